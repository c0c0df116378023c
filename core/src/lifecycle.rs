//! The lifecycle reducer
//!
//! [`AsyncActionReducer`] folds lifecycle notifications into an
//! [`AsyncActionState`]. It is pure: the only thing it reads from its
//! environment is the clock, to stamp cached responses.

use crate::action::{IntoLifecycle, Lifecycle};
use crate::effect::Effect;
use crate::environment::{Clock, HasClock};
use crate::reducer::Reducer;
use crate::state::{AsyncActionState, CachedResponse, StatusRecord};
use crate::status::LifecycleStatus;
use crate::{SmallVec, smallvec};
use std::marker::PhantomData;

/// Apply one lifecycle notification to the state
///
/// `now_epoch_seconds` stamps the cached response of a `COMPLETE` that asks
/// for caching. `DEDUPED` and `CACHED` leave the state untouched.
pub fn apply_lifecycle<P: Clone>(
    state: &mut AsyncActionState<P>,
    lifecycle: Lifecycle<P>,
    now_epoch_seconds: i64,
) {
    let Lifecycle {
        operation_type,
        meta,
        payload,
        error,
    } = lifecycle;
    let identifier = meta.identifier.as_deref();

    match meta.status {
        LifecycleStatus::Pending => {
            state.upsert(&operation_type, identifier, |previous| StatusRecord {
                pending: true,
                completed: previous.is_some_and(|r| r.completed),
                error: None,
                cached_response: previous.and_then(|r| r.cached_response.clone()),
            });
        },
        LifecycleStatus::Complete => {
            let cached_response = payload
                .filter(|_| meta.wants_cache())
                .map(|value| CachedResponse {
                    value,
                    captured_at_epoch_seconds: now_epoch_seconds,
                });
            state.upsert(&operation_type, identifier, |_| StatusRecord {
                pending: false,
                completed: true,
                error: None,
                cached_response,
            });
        },
        LifecycleStatus::Failed => {
            let error = error.map(|failure| failure.error_info());
            state.upsert(&operation_type, identifier, |previous| StatusRecord {
                pending: false,
                completed: previous.is_some_and(|r| r.completed),
                error: Some(error.unwrap_or_else(crate::ErrorInfo::unknown)),
                cached_response: None,
            });
        },
        LifecycleStatus::Reset => {
            state.remove(&operation_type, identifier);
        },
        LifecycleStatus::Deduped | LifecycleStatus::Cached => {},
    }
}

/// Reducer maintaining the lifecycle mapping
///
/// Generic over the host's whole action type `Act`, so it can be registered
/// with [`scope_reducer`](crate::composition::scope_reducer) onto the field
/// that holds the mapping and combined with the application's own reducers.
/// Actions that are not lifecycle notifications are no-ops.
///
/// The environment only has to provide a clock, see [`HasClock`].
pub struct AsyncActionReducer<Act, E> {
    _phantom: PhantomData<fn() -> (Act, E)>,
}

impl<Act, E> AsyncActionReducer<Act, E> {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<Act, E> Default for AsyncActionReducer<Act, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Act, E> Clone for AsyncActionReducer<Act, E> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Act, E> std::fmt::Debug for AsyncActionReducer<Act, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncActionReducer")
    }
}

impl<Act, E> Reducer for AsyncActionReducer<Act, E>
where
    Act: IntoLifecycle,
    Act::Payload: Clone,
    E: HasClock,
{
    type State = AsyncActionState<Act::Payload>;
    type Action = Act;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        if let Some(lifecycle) = action.into_lifecycle() {
            apply_lifecycle(state, lifecycle, env.clock().epoch_seconds());
        }
        smallvec![Effect::None]
    }
}
