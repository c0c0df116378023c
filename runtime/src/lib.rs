//! # Async Lifecycle Runtime
//!
//! Runtime implementation for async lifecycle tracking.
//!
//! ## Core Components
//!
//! - **Store**: The host that owns state, runs the reducer and executes effects
//! - **Orchestrator**: Runs asynchronous operations and reports their lifecycle
//!   into a store, deduplicating in-flight calls and serving cached responses
//! - **Metrics**: Prometheus metric descriptions and recorders
//!
//! ## Example
//!
//! ```ignore
//! use async_lifecycle_runtime::{AsyncActionOptions, Orchestrator, Store};
//!
//! let store = Store::new(AppState::default(), app_reducer(), environment);
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

use async_lifecycle_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::RwLock;

/// Prometheus metrics for observability
pub mod metrics;

/// Lifecycle orchestration of asynchronous operations
pub mod orchestrator;

pub use orchestrator::{AsyncActionOptions, AsyncError, AsyncThunk, Orchestrator};

/// Error types for the Store runtime
pub mod error {
    use async_lifecycle_core::DispatchError;
    use thiserror::Error;

    /// Errors returned by [`Store`](crate::Store)
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// `shutdown` has begun; no further actions are reduced
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Effects were still running when the shutdown timeout elapsed
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// The state lock was poisoned by a panicking reducer
        #[error("Store state lock poisoned")]
        LockPoisoned,

        /// A listener failed while handling an action
        ///
        /// The action has already been reduced and its effects scheduled.
        #[error("Action listener failed: {0}")]
        ListenerFailed(String),
    }

    impl From<StoreError> for DispatchError {
        fn from(error: StoreError) -> Self {
            match error {
                StoreError::ShutdownInProgress => Self::ShutdownInProgress,
                StoreError::LockPoisoned => Self::LockPoisoned,
                StoreError::ListenerFailed(reason) => Self::Rejected(reason),
                timeout @ StoreError::ShutdownTimeout(_) => Self::Rejected(timeout.to_string()),
            }
        }
    }
}

pub use error::StoreError;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use async_lifecycle_runtime::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_broadcast_capacity(256)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.broadcast_capacity, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of actions buffered for each observer of the action broadcast
    pub broadcast_capacity: usize,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Configuration with explicit values
    #[must_use]
    pub const fn new(broadcast_capacity: usize, default_shutdown_timeout: Duration) -> Self {
        Self {
            broadcast_capacity,
            default_shutdown_timeout,
        }
    }

    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 16,
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Releases one effect of the shutdown drain when dropped, even on panic
struct PendingEffectGuard(Arc<AtomicUsize>);

impl Drop for PendingEffectGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The store: state, reducer, environment and effect execution
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, Ordering, PendingEffectGuard, Reducer,
        RwLock, StoreConfig, StoreError,
    };
    use crate::metrics::StoreMetrics;
    use async_lifecycle_core::{DispatchError, Host};
    use std::sync::PoisonError;
    use tokio::sync::broadcast;

    /// Observer called synchronously after every reduced action
    type Listener<A> = Arc<dyn Fn(&A) -> Result<(), String> + Send + Sync>;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind a `RwLock`)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies, the extra argument of
    ///    orchestrated operations)
    /// 4. Effects (delayed actions fed back into the store)
    ///
    /// `send` is synchronous: when it returns, the action has been reduced and
    /// every listener has seen it. This is what lets the orchestrator observe
    /// a `PENDING` notification before the next caller checks the state.
    ///
    /// Cloning a store is cheap; clones share state.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        listeners: Arc<RwLock<Vec<Listener<A>>>>,
        config: StoreConfig,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Every reduced action is broadcast to observers.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a store with the default [`StoreConfig`]
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a store with `config`
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                listeners: Arc::new(RwLock::new(Vec::new())),
                config,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// The store's configuration
        #[must_use]
        pub const fn config(&self) -> &StoreConfig {
            &self.config
        }

        /// The injected environment
        #[must_use]
        pub fn environment(&self) -> &E {
            &self.environment
        }

        /// Register a listener called after every reduced action
        ///
        /// A listener returning `Err` makes the `send` that triggered it fail
        /// with [`StoreError::ListenerFailed`]. The state change stands.
        pub fn add_listener<F>(&self, listener: F)
        where
            F: Fn(&A) -> Result<(), String> + Send + Sync + 'static,
        {
            self.listeners
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::new(listener));
        }

        /// Initiate graceful shutdown of the store
        ///
        /// Sets the shutdown flag (rejecting new actions), then waits for
        /// pending effects to complete.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Store shutdown requested");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("Store drained, shutdown complete");
                    metrics::counter!("store.shutdown.completed").increment(1);
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Store shutdown timed out");
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tracing::debug!(pending_effects = pending, "Draining effects before shutdown");

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Shut down using [`StoreConfig::default_shutdown_timeout`]
        ///
        /// # Errors
        ///
        /// See [`Store::shutdown`].
        pub async fn shutdown_with_default_timeout(&self) -> Result<(), StoreError> {
            self.shutdown(self.config.default_shutdown_timeout).await
        }

        /// Send an action to the store
        ///
        /// 1. Acquires the write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Broadcasts the action and calls every listener
        /// 4. Schedules the returned effects on the current tokio runtime
        ///
        /// # Errors
        ///
        /// - [`StoreError::ShutdownInProgress`] if the store is shutting down
        /// - [`StoreError::LockPoisoned`] if a reducer panicked earlier
        /// - [`StoreError::ListenerFailed`] with the first rejection if any
        ///   listener rejected the action
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub fn send(&self, action: A) -> Result<(), StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                StoreMetrics::record_rejected();
                return Err(StoreError::ShutdownInProgress);
            }

            tracing::debug!("Processing action");
            StoreMetrics::record_command();

            let effects = {
                let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
                tracing::trace!("Acquired write lock on state");

                let start = std::time::Instant::now();
                let effects = self
                    .reducer
                    .reduce(&mut state, action.clone(), &self.environment);
                StoreMetrics::record_reducer(start.elapsed());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            let _ = self.action_broadcast.send(action.clone());
            let rejected = self.notify_listeners(&action);

            for effect in effects {
                self.execute_effect(effect);
            }

            match rejected {
                Some(reason) => {
                    tracing::warn!(reason = %reason, "Action listener failed");
                    Err(StoreError::ListenerFailed(reason))
                },
                None => Ok(()),
            }
        }

        /// Subscribe to every action reduced by this store
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let pending = store.state(|s| selectors::is_pending(s, "GET_USER", None, false));
        /// ```
        pub fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            f(&state)
        }

        fn notify_listeners(&self, action: &A) -> Option<String> {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let mut first_error = None;
            for listener in &listeners {
                if let Err(error) = listener(action) {
                    first_error.get_or_insert(error);
                }
            }
            first_error
        }

        /// Run an effect returned by the reducer
        ///
        /// A delayed action is sent back to the store from a spawned task that
        /// counts against the shutdown drain. Without a tokio runtime there is
        /// nothing to drive the delay, so the action is dropped.
        fn execute_effect(&self, effect: Effect<A>) {
            match effect {
                Effect::None => StoreMetrics::record_effect("none"),
                Effect::Delay { duration, action } => {
                    StoreMetrics::record_effect("delay");
                    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                        tracing::warn!(?duration, "No tokio runtime, delayed action dropped");
                        return;
                    };
                    tracing::trace!(?duration, "Scheduling delayed action");

                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let guard = PendingEffectGuard(Arc::clone(&self.pending_effects));
                    let store = self.clone();

                    runtime.spawn(async move {
                        let _guard = guard;
                        tokio::time::sleep(duration).await;
                        if let Err(error) = store.send(*action) {
                            tracing::warn!(error = %error, "Delayed action rejected");
                        }
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                listeners: Arc::clone(&self.listeners),
                config: self.config.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }

    impl<S, A, E, R> Host for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        type State = S;
        type Action = A;
        type Extra = E;

        fn dispatch(&self, action: A) -> Result<(), DispatchError> {
            self.send(action).map_err(DispatchError::from)
        }

        fn with_state<T>(&self, f: impl FnOnce(&S) -> T) -> T {
            self.state(f)
        }

        fn extra(&self) -> &E {
            &self.environment
        }
    }
}

// Re-export for convenience
pub use store::Store;
