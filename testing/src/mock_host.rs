//! A recording host for orchestrator tests

use crate::mocks::ManualClock;
use async_lifecycle_core::reducer::Reducer;
use async_lifecycle_core::{
    AsyncAction, AsyncActionReducer, AsyncActionState, DispatchError, Host, LifecycleStatus,
    OperationType,
};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Host that reduces lifecycle notifications and remembers every one of them
///
/// Dispatch folds the notification into an [`AsyncActionState`] with the
/// lifecycle reducer, timestamped by the host's [`ManualClock`], then records
/// it. [`MockHost::fail_dispatch_on`] makes dispatch of one status fail after
/// reducing, like a listener that throws.
///
/// `X` is the extra argument handed to operations.
///
/// ```
/// use async_lifecycle_core::{AsyncAction, Host, LifecycleStatus, SimpleAction, selectors};
/// use async_lifecycle_testing::MockHost;
///
/// let host: MockHost<SimpleAction, u32> = MockHost::new(());
/// host.dispatch(AsyncAction::pending(SimpleAction::new("LOAD"), None)).unwrap();
///
/// assert_eq!(host.statuses(), vec![LifecycleStatus::Pending]);
/// assert!(host.with_state(|s| selectors::is_pending(s, "LOAD", None, false)));
/// ```
pub struct MockHost<A, P, X = ()> {
    inner: Arc<Inner<A, P, X>>,
}

struct Inner<A, P, X> {
    state: RwLock<AsyncActionState<P>>,
    dispatched: Mutex<Vec<AsyncAction<A, P>>>,
    fail_on: Mutex<Option<LifecycleStatus>>,
    reducer: AsyncActionReducer<AsyncAction<A, P>, ManualClock>,
    clock: ManualClock,
    extra: X,
}

impl<A, P, X> Clone for MockHost<A, P, X> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, P, X> MockHost<A, P, X> {
    /// Create a host with empty state and a default [`ManualClock`]
    #[must_use]
    pub fn new(extra: X) -> Self {
        Self::with_clock(extra, ManualClock::default())
    }

    /// Create a host that timestamps cached responses with `clock`
    #[must_use]
    pub fn with_clock(extra: X, clock: ManualClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(AsyncActionState::new()),
                dispatched: Mutex::new(Vec::new()),
                fail_on: Mutex::new(None),
                reducer: AsyncActionReducer::new(),
                clock,
                extra,
            }),
        }
    }

    /// Replace the current state
    pub fn given_state(&self, state: AsyncActionState<P>) {
        *self.inner.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Make dispatching notifications with `status` fail
    pub fn fail_dispatch_on(&self, status: LifecycleStatus) {
        *self.inner.fail_on.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }

    /// Let every dispatch succeed again
    pub fn clear_dispatch_failure(&self) {
        *self.inner.fail_on.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// The clock used by the lifecycle reducer
    #[must_use]
    pub fn clock(&self) -> &ManualClock {
        &self.inner.clock
    }

    /// Statuses of every dispatched notification, in order
    #[must_use]
    pub fn statuses(&self) -> Vec<LifecycleStatus> {
        self.inner
            .dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|notification| notification.meta.status)
            .collect()
    }

    /// Forget every recorded notification
    pub fn clear(&self) {
        self.inner
            .dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<A: Clone, P: Clone, X> MockHost<A, P, X> {
    /// Every dispatched notification, in order
    #[must_use]
    pub fn dispatched(&self) -> Vec<AsyncAction<A, P>> {
        self.inner
            .dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// A snapshot of the current state
    #[must_use]
    pub fn state(&self) -> AsyncActionState<P> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<A, P, X> Host for MockHost<A, P, X>
where
    A: OperationType + Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    X: Send + Sync + 'static,
{
    type State = AsyncActionState<P>;
    type Action = AsyncAction<A, P>;
    type Extra = X;

    fn dispatch(&self, action: Self::Action) -> Result<(), DispatchError> {
        let status = action.meta.status;
        {
            let mut state = self.inner.state.write().map_err(|_| DispatchError::LockPoisoned)?;
            let _ = self
                .inner
                .reducer
                .reduce(&mut state, action.clone(), &self.inner.clock);
        }
        self.inner
            .dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);

        let fail_on = *self.inner.fail_on.lock().unwrap_or_else(PoisonError::into_inner);
        if fail_on == Some(status) {
            return Err(DispatchError::Rejected(format!(
                "listener rejected {}",
                status.as_str()
            )));
        }
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&Self::State) -> T) -> T {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn extra(&self) -> &X {
        &self.inner.extra
    }
}
