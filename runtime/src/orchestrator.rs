//! Lifecycle orchestration of asynchronous operations
//!
//! An [`Orchestrator`] turns an action descriptor and an asynchronous
//! operation into an [`AsyncThunk`]. Running the thunk against a [`Host`]
//! reports the operation's lifecycle into the host's state:
//!
//! 1. key already pending: `DEDUPED`, and the caller awaits the in-flight result
//! 2. fresh cached response (when caching is requested): `CACHED`
//! 3. otherwise: `PENDING`, then `COMPLETE` or `FAILED` once the operation settles
//!
//! The orchestrator owns the table of in-flight results, so deduplicated
//! callers observe the very same value (or error) as the original caller.
//! Orchestrators are cheap to clone; clones share the table.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new(SystemClock);
//!
//! let user = orchestrator
//!     .begin_operation(
//!         SimpleAction::new("GET_USER"),
//!         |host: AppStore| async move { host.extra().api.get_user(42).await },
//!         AsyncActionOptions::new().with_identifier("42").with_cache(true),
//!     )
//!     .run(store.clone())
//!     .await?;
//! ```

use crate::metrics::LifecycleMetrics;
use async_lifecycle_core::environment::{Clock, SystemClock};
use async_lifecycle_core::{
    AsyncAction, DispatchError, FailureValue, HasAsyncActions, Host, OperationKey,
    OperationType, selectors,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Options for one orchestrated operation
///
/// ```
/// use async_lifecycle_runtime::AsyncActionOptions;
///
/// let options = AsyncActionOptions::new()
///     .with_identifier("42")
///     .with_cache(true)
///     .with_ttl_seconds(60);
/// assert_eq!(options.identifier.as_deref(), Some("42"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncActionOptions {
    /// Disambiguates concurrent instances of the same operation type
    pub identifier: Option<String>,
    /// Keep a successful result and serve it to later calls
    pub cache: bool,
    /// Ignore any cached response and run the operation again
    pub overwrite_cache: bool,
    /// Maximum age of a cached response, in seconds
    pub ttl_seconds: Option<u64>,
}

impl AsyncActionOptions {
    /// Options with no identifier and no caching
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identifier
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Request caching of a successful result
    #[must_use]
    pub const fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Bypass an existing cached response
    #[must_use]
    pub const fn with_overwrite_cache(mut self, overwrite_cache: bool) -> Self {
        self.overwrite_cache = overwrite_cache;
        self
    }

    /// Limit the age of cached responses
    #[must_use]
    pub const fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }
}

/// Errors returned by a running [`AsyncThunk`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsyncError {
    /// The operation failed; carries the original error
    #[error("Operation failed: {0}")]
    Operation(FailureValue),

    /// A lifecycle notification could not be dispatched
    ///
    /// Takes precedence over an operation failure reported in the same run.
    #[error("Failed to dispatch lifecycle notification: {0}")]
    Dispatch(#[from] DispatchError),

    /// State reports the key pending but this orchestrator holds no result for it
    #[error("Operation {0} is pending but not in flight on this orchestrator")]
    NotInFlight(OperationKey),
}

impl AsyncError {
    /// The operation's original failure, if that is what this error is
    #[must_use]
    pub const fn failure(&self) -> Option<&FailureValue> {
        match self {
            Self::Operation(failure) => Some(failure),
            _ => None,
        }
    }
}

type SharedResult<P> = Shared<BoxFuture<'static, Result<P, AsyncError>>>;

struct InFlight<P> {
    generation: u64,
    result: SharedResult<P>,
}

struct Table<P> {
    next_generation: u64,
    entries: HashMap<OperationKey, InFlight<P>>,
}

struct Inner<P, C> {
    clock: C,
    table: Mutex<Table<P>>,
}

impl<P, C> Inner<P, C> {
    fn lock_table(&self) -> MutexGuard<'_, Table<P>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs asynchronous operations and reports their lifecycle into a host
///
/// The table of in-flight results belongs to the orchestrator, so separate
/// orchestrators never deduplicate against each other. Checking for a pending
/// key, dispatching `PENDING` and registering the in-flight result happen
/// under one lock, as do dispatching the outcome and unregistering it.
///
/// Listeners on the host must not call back into the same orchestrator
/// synchronously while handling a lifecycle notification.
pub struct Orchestrator<P, C = SystemClock> {
    inner: Arc<Inner<P, C>>,
}

impl<P, C> Clone for Orchestrator<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> Default for Orchestrator<P, SystemClock> {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

impl<P, C> std::fmt::Debug for Orchestrator<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("in_flight", &self.inner.lock_table().entries.len())
            .finish_non_exhaustive()
    }
}

impl<P, C> Orchestrator<P, C> {
    /// Create an orchestrator that ages cached responses with `clock`
    #[must_use]
    pub fn new(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                table: Mutex::new(Table {
                    next_generation: 0,
                    entries: HashMap::new(),
                }),
            }),
        }
    }

    /// The clock used for cache freshness
    #[must_use]
    pub fn clock(&self) -> &C {
        &self.inner.clock
    }

    /// Number of operations currently in flight
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_table().entries.len()
    }

    /// True if an operation for the key is in flight
    #[must_use]
    pub fn is_in_flight(&self, operation_type: &str, identifier: Option<&str>) -> bool {
        self.inner
            .lock_table()
            .entries
            .contains_key(&OperationKey::new(operation_type, identifier))
    }

    /// Wrap `operation` into a thunk reporting its lifecycle under `action`
    ///
    /// Nothing happens until the thunk is run. The operation receives a clone
    /// of the host, giving it dispatch, state access and the host's extra
    /// argument.
    #[must_use]
    pub fn begin_operation<A, F>(
        &self,
        action: A,
        operation: F,
        options: AsyncActionOptions,
    ) -> AsyncThunk<A, P, F, C> {
        AsyncThunk {
            orchestrator: self.clone(),
            action,
            operation,
            options,
        }
    }

    /// Dispatch `RESET` for the key, discarding its status record
    ///
    /// An operation still in flight keeps running; its outcome is reported
    /// into a fresh record.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the host rejects the notification.
    pub fn reset_operation<H, A>(
        &self,
        host: &H,
        action: A,
        identifier: Option<&str>,
    ) -> Result<(), DispatchError>
    where
        H: Host,
        H::Action: From<AsyncAction<A, P>>,
        A: OperationType,
    {
        notify(host, AsyncAction::reset(action, identifier))
    }
}

/// Dispatch a notification, recording it in logs and metrics
fn notify<H, A, P>(host: &H, notification: AsyncAction<A, P>) -> Result<(), DispatchError>
where
    H: Host,
    H::Action: From<AsyncAction<A, P>>,
    A: OperationType,
{
    let status = notification.meta.status;
    tracing::debug!(
        operation_type = notification.action.operation_type(),
        identifier = notification.meta.identifier.as_deref().unwrap_or_default(),
        status = status.label(),
        "Dispatching lifecycle notification"
    );
    LifecycleMetrics::record_notification(status);

    host.dispatch(notification.into()).inspect_err(|error| {
        tracing::warn!(
            status = status.label(),
            error = %error,
            "Lifecycle notification dispatch failed"
        );
    })
}

enum Started<P> {
    Ready(P),
    Waiting(SharedResult<P>),
}

/// An orchestrated operation waiting to be run against a host
///
/// Created by [`Orchestrator::begin_operation`].
pub struct AsyncThunk<A, P, F, C = SystemClock> {
    orchestrator: Orchestrator<P, C>,
    action: A,
    operation: F,
    options: AsyncActionOptions,
}

impl<A, P, F, C> std::fmt::Debug for AsyncThunk<A, P, F, C>
where
    A: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncThunk")
            .field("action", &self.action)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<A, P, F, C> AsyncThunk<A, P, F, C>
where
    A: OperationType + Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    C: Clock + 'static,
{
    /// The key this thunk reports under
    #[must_use]
    pub fn key(&self) -> OperationKey {
        OperationKey::new(
            self.action.operation_type(),
            self.options.identifier.as_deref(),
        )
    }

    /// Run the thunk against `host`
    ///
    /// Resolves with the operation's value, the cached value, or (when
    /// deduplicated) the value of the operation already in flight. The
    /// started operation is driven on a spawned task when a tokio runtime is
    /// available, so it completes even if every caller stops awaiting.
    ///
    /// # Errors
    ///
    /// - [`AsyncError::Operation`]: the operation failed; `FAILED` was dispatched
    /// - [`AsyncError::Dispatch`]: a notification could not be dispatched
    /// - [`AsyncError::NotInFlight`]: the key was pending in state but not
    ///   started by this orchestrator
    #[tracing::instrument(
        skip_all,
        name = "async_thunk",
        fields(
            operation_type = self.action.operation_type(),
            identifier = self.options.identifier.as_deref().unwrap_or_default()
        )
    )]
    pub async fn run<H, Fut, E>(self, host: H) -> Result<P, AsyncError>
    where
        H: Host,
        H::Action: From<AsyncAction<A, P>>,
        H::State: HasAsyncActions<Payload = P>,
        F: FnOnce(H) -> Fut + Send + 'static,
        Fut: Future<Output = Result<P, E>> + Send + 'static,
        E: Into<FailureValue> + Send + 'static,
    {
        match self.start(host)? {
            Started::Ready(value) => Ok(value),
            Started::Waiting(result) => result.await,
        }
    }

    fn start<H, Fut, E>(self, host: H) -> Result<Started<P>, AsyncError>
    where
        H: Host,
        H::Action: From<AsyncAction<A, P>>,
        H::State: HasAsyncActions<Payload = P>,
        F: FnOnce(H) -> Fut + Send + 'static,
        Fut: Future<Output = Result<P, E>> + Send + 'static,
        E: Into<FailureValue> + Send + 'static,
    {
        let key = self.key();
        let Self {
            orchestrator,
            action,
            operation,
            options,
        } = self;
        let identifier = options.identifier.as_deref();

        let mut table = orchestrator.inner.lock_table();

        let pending = host.with_state(|state| {
            selectors::is_pending(state, key.operation_type(), key.identifier(), false)
        });
        if pending {
            notify(&host, AsyncAction::deduped(action, identifier))?;
            LifecycleMetrics::record_deduped();
            tracing::debug!(key = %key, "Joined operation already in flight");

            return table
                .entries
                .get(&key)
                .map(|in_flight| Started::Waiting(in_flight.result.clone()))
                .ok_or(AsyncError::NotInFlight(key));
        }

        if options.cache && !options.overwrite_cache {
            let now = orchestrator.inner.clock.epoch_seconds();
            let cached = host.with_state(|state| {
                selectors::cached_value(
                    state,
                    key.operation_type(),
                    key.identifier(),
                    options.ttl_seconds,
                    now,
                )
            });
            if let Some(value) = cached {
                notify(&host, AsyncAction::cached(action, identifier, value.clone()))?;
                LifecycleMetrics::record_cache_hit();
                return Ok(Started::Ready(value));
            }
        }

        notify(&host, AsyncAction::pending(action.clone(), identifier))?;
        LifecycleMetrics::record_started();

        let generation = table.next_generation;
        table.next_generation = table.next_generation.wrapping_add(1);

        // The operation is invoked on first poll, once the table is unlocked.
        let result = settle(
            orchestrator.clone(),
            host,
            action,
            options.identifier.clone(),
            key.clone(),
            generation,
            options.cache,
            operation,
        )
        .boxed()
        .shared();

        table.entries.insert(
            key,
            InFlight {
                generation,
                result: result.clone(),
            },
        );
        LifecycleMetrics::record_in_flight(table.entries.len());
        drop(table);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(result.clone().map(drop));
        }

        Ok(Started::Waiting(result))
    }
}

/// Invoke and await the operation, then report its outcome and unregister it
#[allow(clippy::too_many_arguments)]
async fn settle<H, A, P, C, F, Fut, E>(
    orchestrator: Orchestrator<P, C>,
    host: H,
    action: A,
    identifier: Option<String>,
    key: OperationKey,
    generation: u64,
    cache: bool,
    operation: F,
) -> Result<P, AsyncError>
where
    H: Host,
    H::Action: From<AsyncAction<A, P>>,
    A: OperationType,
    P: Clone,
    F: FnOnce(H) -> Fut,
    Fut: Future<Output = Result<P, E>>,
    E: Into<FailureValue>,
{
    let outcome: Result<P, FailureValue> = operation(host.clone()).await.map_err(Into::into);
    let identifier = identifier.as_deref();

    let mut table = orchestrator.inner.lock_table();

    let dispatched = match &outcome {
        Ok(payload) => notify(
            &host,
            AsyncAction::complete(action, identifier, payload.clone(), cache),
        ),
        Err(failure) => {
            tracing::warn!(key = %key, error = %failure, "Operation failed");
            LifecycleMetrics::record_failed();
            notify(&host, AsyncAction::failed(action, identifier, failure.clone()))
        },
    };

    // A reset followed by a new start may have replaced our entry.
    if table
        .entries
        .get(&key)
        .is_some_and(|in_flight| in_flight.generation == generation)
    {
        table.entries.remove(&key);
    }
    LifecycleMetrics::record_in_flight(table.entries.len());
    drop(table);

    dispatched?;
    outcome.map_err(AsyncError::Operation)
}
