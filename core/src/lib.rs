//! # Async Lifecycle Core
//!
//! Core traits and types for tracking asynchronous operations inside a
//! reducer-based store.
//!
//! An asynchronous operation (typically a network request) is wrapped by the
//! runtime's orchestrator, which emits lifecycle notifications
//! (`PENDING`, `COMPLETE`, `FAILED`, `DEDUPED`, `CACHED`, `RESET`) into the
//! store. This crate provides the functional half of that loop:
//!
//! - **Notifications**: [`AsyncAction`], a caller-supplied action decorated with
//!   payload, error and lifecycle metadata
//! - **State**: [`AsyncActionState`], a nested `operation type -> identifier -> record`
//!   mapping of [`StatusRecord`]s
//! - **Reducer**: [`AsyncActionReducer`], a pure fold of notifications into that state
//! - **Selectors**: pure (and memoised) read functions deriving pending, error and
//!   cache status
//! - **Host**: the boundary trait through which the orchestrator dispatches
//!   notifications and reads state
//!
//! ## Example
//!
//! ```
//! use async_lifecycle_core::{
//!     AsyncAction, AsyncActionReducer, AsyncActionState, SimpleAction,
//!     reducer::Reducer, selectors,
//! };
//! use chrono::{TimeZone, Utc};
//!
//! # #[derive(Clone)]
//! # struct Fixed(chrono::DateTime<Utc>);
//! # impl async_lifecycle_core::environment::Clock for Fixed {
//! #     fn now(&self) -> chrono::DateTime<Utc> { self.0 }
//! # }
//! let clock = Fixed(Utc.timestamp_opt(1_522_620_261, 0).unwrap());
//! let reducer = AsyncActionReducer::<AsyncAction<SimpleAction, String>, Fixed>::new();
//! let mut state = AsyncActionState::default();
//!
//! let pending = AsyncAction::pending(SimpleAction::new("GET_FOOS"), Some("foo"));
//! let _ = reducer.reduce(&mut state, pending, &clock);
//!
//! assert!(selectors::is_pending(&state, "GET_FOOS", Some("foo"), false));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

pub mod action;
pub mod composition;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod selectors;
pub mod state;
pub mod status;

pub use action::{
    AsyncAction, AsyncMeta, IntoLifecycle, Lifecycle, OperationKey, OperationType, SimpleAction,
    reset_async_action,
};
pub use error::{DispatchError, ErrorInfo, FailureValue};
pub use host::Host;
pub use lifecycle::AsyncActionReducer;
pub use state::{AsyncActionState, CachedResponse, HasAsyncActions, StatusRecord};
pub use status::LifecycleStatus;

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all state transition logic and are deterministic and testable.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for ProfileReducer {
    ///     type State = ProfileState;
    ///     type Action = AppAction;
    ///     type Environment = AppEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut ProfileState,
    ///         action: AppAction,
    ///         env: &AppEnvironment,
    ///     ) -> SmallVec<[Effect<AppAction>; 4]> {
    ///         match action {
    ///             AppAction::Profile(notification) if status::is_complete(&notification) => {
    ///                 state.profile = notification.payload;
    ///                 smallvec![Effect::None]
    ///             }
    ///             _ => smallvec![Effect::None],
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Apply `action` to `state` in place and describe the follow-up work
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Side effect descriptions
pub mod effect {
    use std::time::Duration;

    /// A side effect returned by a reducer and run by the store
    ///
    /// The lifecycle reducer only ever returns [`Effect::None`]; orchestrated
    /// operations run outside the reducer. App reducers use
    /// [`Effect::Delay`] for follow-ups such as dismissing a notice.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Send `action` back to the store after `duration`
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Cache entries are stamped and aged in whole seconds since the Unix epoch,
    /// see [`Clock::epoch_seconds`].
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Whole seconds since the Unix epoch, rounded down
        fn epoch_seconds(&self) -> i64 {
            self.now().timestamp()
        }
    }

    /// Wall clock backed by [`Utc::now`]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Environments that can provide a [`Clock`]
    ///
    /// The lifecycle reducer stamps cache entries with the environment's clock.
    /// Every clock is trivially its own environment; application environments
    /// implement this to expose the clock they carry.
    pub trait HasClock {
        /// The clock type provided
        type Clock: Clock;

        /// Borrow the clock
        fn clock(&self) -> &Self::Clock;
    }

    impl<C: Clock> HasClock for C {
        type Clock = C;

        fn clock(&self) -> &C {
            self
        }
    }
}
