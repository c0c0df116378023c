//! User directory domain
//!
//! A directory screen loading user profiles from a slow, occasionally
//! failing backend. Lookups go through an [`Orchestrator`], so the lifecycle
//! of every lookup lands in [`DirectoryState::async_actions`] next to the
//! loaded profiles. A failed lookup raises an error banner that dismisses
//! itself after a while.

use async_lifecycle_core::composition::{CombinedReducer, combine_reducers, scope_reducer};
use async_lifecycle_core::environment::{Clock, HasClock, SystemClock};
use async_lifecycle_core::{
    AsyncAction, AsyncActionReducer, AsyncActionState, AsyncMeta, ErrorInfo, HasAsyncActions,
    IntoLifecycle, Lifecycle, SimpleAction, SmallVec, effect::Effect, reducer::Reducer, selectors,
    smallvec, status,
};
use async_lifecycle_runtime::{AsyncActionOptions, AsyncError, Orchestrator, Store};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Operation type of profile lookups
pub const GET_USER: &str = "GET_USER";

/// A user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// User id
    pub id: u32,
    /// Display name
    pub name: String,
    /// Contact address
    pub email: String,
}

/// Failures of the simulated backend
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No profile with this id
    #[error("user {0} not found")]
    NotFound(u32),
    /// The backend refused the request
    #[error("directory service unavailable")]
    Unavailable,
}

/// Simulated directory backend
#[derive(Debug)]
pub struct DirectoryApi {
    users: HashMap<u32, User>,
    latency: Duration,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl DirectoryApi {
    /// A backend with a few seeded profiles
    #[must_use]
    pub fn seeded(latency: Duration) -> Self {
        let users = [(1, "Ada Lovelace"), (2, "Grace Hopper"), (3, "Edsger Dijkstra")]
            .into_iter()
            .map(|(id, name)| {
                let first = name.split(' ').next().unwrap_or(name);
                let email = format!("{}@example.com", first.to_lowercase());
                (
                    id,
                    User {
                        id,
                        name: name.to_owned(),
                        email,
                    },
                )
            })
            .collect();

        Self {
            users,
            latency,
            calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Requests served so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every following request fail with [`DirectoryError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Look a profile up
    pub fn get_user(&self, id: u32) -> impl Future<Output = Result<User, DirectoryError>> + Send + use<> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::info!(id, "Directory backend request");

        let outcome = if self.unavailable.load(Ordering::SeqCst) {
            Err(DirectoryError::Unavailable)
        } else {
            self.users.get(&id).cloned().ok_or(DirectoryError::NotFound(id))
        };
        let latency = self.latency;

        async move {
            tokio::time::sleep(latency).await;
            outcome
        }
    }
}

/// Lookup notifications
pub type UserNotification = AsyncAction<SimpleAction, User>;

/// Directory actions
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryAction {
    /// Lifecycle of a profile lookup
    Users(UserNotification),
    /// Hide the error banner
    DismissBanner,
}

impl From<UserNotification> for DirectoryAction {
    fn from(notification: UserNotification) -> Self {
        Self::Users(notification)
    }
}

impl IntoLifecycle for DirectoryAction {
    type Payload = User;

    fn lifecycle_meta(&self) -> Option<&AsyncMeta> {
        match self {
            Self::Users(notification) => notification.lifecycle_meta(),
            Self::DismissBanner => None,
        }
    }

    fn into_lifecycle(self) -> Option<Lifecycle<User>> {
        match self {
            Self::Users(notification) => notification.into_lifecycle(),
            Self::DismissBanner => None,
        }
    }
}

/// Directory screen state
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryState {
    /// Lifecycle of every lookup
    pub async_actions: AsyncActionState<User>,
    /// Loaded profiles
    pub users: BTreeMap<u32, User>,
    /// Error banner shown after a failed lookup
    pub banner: Option<String>,
}

impl HasAsyncActions for DirectoryState {
    type Payload = User;

    fn async_actions(&self) -> Option<&AsyncActionState<User>> {
        Some(&self.async_actions)
    }
}

/// How long the error banner stays up by default
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(5);

/// Directory dependencies
#[derive(Debug)]
pub struct DirectoryEnvironment<C = SystemClock> {
    /// Stamps cached profiles
    pub clock: C,
    /// Profile backend
    pub api: DirectoryApi,
    /// How long the error banner stays up
    pub banner_timeout: Duration,
}

impl<C: Clock> HasClock for DirectoryEnvironment<C> {
    type Clock = C;

    fn clock(&self) -> &C {
        &self.clock
    }
}

/// Keeps loaded profiles and the error banner
pub struct ProfilesReducer<C = SystemClock> {
    _clock: PhantomData<fn() -> C>,
}

impl<C> ProfilesReducer<C> {
    /// Create the reducer
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _clock: PhantomData,
        }
    }
}

impl<C> Default for ProfilesReducer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> std::fmt::Debug for ProfilesReducer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProfilesReducer")
    }
}

impl<C> Reducer for ProfilesReducer<C> {
    type State = DirectoryState;
    type Action = DirectoryAction;
    type Environment = DirectoryEnvironment<C>;

    fn reduce(
        &self,
        state: &mut DirectoryState,
        action: DirectoryAction,
        env: &DirectoryEnvironment<C>,
    ) -> SmallVec<[Effect<DirectoryAction>; 4]> {
        match action {
            DirectoryAction::Users(notification) if status::is_complete(&notification) => {
                if let Some(user) = notification.payload {
                    state.users.insert(user.id, user);
                }
                state.banner = None;
            },
            DirectoryAction::Users(notification) if status::is_failed(&notification) => {
                let info = notification
                    .error
                    .map(|failure| failure.error_info())
                    .unwrap_or_else(ErrorInfo::unknown);
                state.banner = Some(format!("Could not load user: {}", info.message));
                return smallvec![Effect::Delay {
                    duration: env.banner_timeout,
                    action: Box::new(DirectoryAction::DismissBanner),
                }];
            },
            DirectoryAction::Users(_) => {},
            DirectoryAction::DismissBanner => state.banner = None,
        }
        smallvec![Effect::None]
    }
}

/// Reducer of the directory screen
pub type DirectoryReducer<C = SystemClock> =
    CombinedReducer<DirectoryState, DirectoryAction, DirectoryEnvironment<C>>;

/// Store of the directory screen
pub type DirectoryStore<C = SystemClock> =
    Store<DirectoryState, DirectoryAction, DirectoryEnvironment<C>, DirectoryReducer<C>>;

/// The lifecycle reducer on `async_actions` combined with [`ProfilesReducer`]
#[must_use]
pub fn directory_reducer<C: Clock + 'static>() -> DirectoryReducer<C> {
    combine_reducers(vec![
        Box::new(scope_reducer(
            AsyncActionReducer::<DirectoryAction, DirectoryEnvironment<C>>::new(),
            |s: &mut DirectoryState| &mut s.async_actions,
        )),
        Box::new(ProfilesReducer::<C>::new()),
    ])
}

/// The directory screen: a store plus the orchestrator running its lookups
#[derive(Clone)]
pub struct Directory<C = SystemClock>
where
    C: Clock + 'static,
{
    store: DirectoryStore<C>,
    orchestrator: Orchestrator<User, C>,
}

impl<C> Directory<C>
where
    C: Clock + Clone + 'static,
{
    /// Create a directory over `api`, with cached profiles aged by `clock`
    #[must_use]
    pub fn new(api: DirectoryApi, clock: C, banner_timeout: Duration) -> Self {
        let orchestrator = Orchestrator::new(clock.clone());
        let store = Store::new(
            DirectoryState::default(),
            directory_reducer(),
            DirectoryEnvironment {
                clock,
                api,
                banner_timeout,
            },
        );
        Self { store, orchestrator }
    }

    /// The underlying store
    #[must_use]
    pub const fn store(&self) -> &DirectoryStore<C> {
        &self.store
    }

    /// Load a profile
    ///
    /// Concurrent lookups of one id share a single backend request.
    ///
    /// # Errors
    ///
    /// Returns [`AsyncError`] if the lookup fails or cannot be reported.
    pub async fn fetch_user(&self, id: u32, options: AsyncActionOptions) -> Result<User, AsyncError> {
        self.orchestrator
            .begin_operation(
                SimpleAction::new(GET_USER),
                move |host: DirectoryStore<C>| host.environment().api.get_user(id),
                options.with_identifier(id.to_string()),
            )
            .run(self.store.clone())
            .await
    }

    /// Forget the lookup status and cached profile of `id`
    ///
    /// # Errors
    ///
    /// Returns [`AsyncError::Dispatch`] if the store rejects the reset.
    pub fn forget(&self, id: u32) -> Result<(), AsyncError> {
        let identifier = id.to_string();
        self.orchestrator
            .reset_operation(&self.store, SimpleAction::new(GET_USER), Some(&identifier))?;
        Ok(())
    }

    /// True while a lookup of `id` is in flight
    #[must_use]
    pub fn is_loading(&self, id: u32) -> bool {
        let identifier = id.to_string();
        self.store
            .state(|s| selectors::is_pending(s, GET_USER, Some(&identifier), false))
    }

    /// Ids with a lookup in flight
    #[must_use]
    pub fn loading_ids(&self) -> Vec<String> {
        self.store
            .state(|s| selectors::all_pending_identifiers(s, GET_USER))
    }

    /// The current error banner
    #[must_use]
    pub fn banner(&self) -> Option<String> {
        self.store.state(|s| s.banner.clone())
    }

    /// Backend requests served so far
    #[must_use]
    pub fn backend_calls(&self) -> usize {
        self.store.environment().api.calls()
    }

    /// The screen state as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialised.
    pub fn state_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.store.state(|state| serde_json::to_value(state))
    }
}
