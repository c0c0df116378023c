//! Integration tests for orchestrated operations reporting into a real Store
//!
//! The lifecycle reducer is scoped onto the application's `async_actions`
//! field and combined with an application reducer, the way an application
//! registers it.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use async_lifecycle_core::composition::{CombinedReducer, combine_reducers, scope_reducer};
use async_lifecycle_core::environment::HasClock;
use async_lifecycle_core::selectors::{self, IsInitialRequestPendingSelector};
use async_lifecycle_core::{
    AsyncAction, AsyncActionReducer, AsyncActionState, AsyncMeta, DispatchError, HasAsyncActions,
    IntoLifecycle, Lifecycle, LifecycleStatus, SimpleAction, SmallVec, effect::Effect,
    reducer::Reducer, smallvec, status,
};
use async_lifecycle_runtime::{AsyncActionOptions, AsyncError, Orchestrator, Store};
use async_lifecycle_testing::ManualClock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct User {
    id: u32,
    name: String,
}

type UserNotification = AsyncAction<SimpleAction, User>;

#[derive(Debug, Clone)]
enum AppAction {
    Users(UserNotification),
    Logout,
}

impl From<UserNotification> for AppAction {
    fn from(notification: UserNotification) -> Self {
        Self::Users(notification)
    }
}

impl IntoLifecycle for AppAction {
    type Payload = User;

    fn lifecycle_meta(&self) -> Option<&AsyncMeta> {
        match self {
            Self::Users(notification) => notification.lifecycle_meta(),
            Self::Logout => None,
        }
    }

    fn into_lifecycle(self) -> Option<Lifecycle<User>> {
        match self {
            Self::Users(notification) => notification.into_lifecycle(),
            Self::Logout => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct AppState {
    async_actions: AsyncActionState<User>,
    users: HashMap<u32, User>,
}

impl HasAsyncActions for AppState {
    type Payload = User;

    fn async_actions(&self) -> Option<&AsyncActionState<User>> {
        Some(&self.async_actions)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("user {0} not found")]
struct NotFound(u32);

/// Simulated backend counting its calls
#[derive(Default)]
struct Api {
    calls: AtomicUsize,
}

impl Api {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn get_user(&self, id: u32) -> impl Future<Output = Result<User, NotFound>> + Send + use<> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            if id == 0 {
                Err(NotFound(id))
            } else {
                Ok(User {
                    id,
                    name: format!("user-{id}"),
                })
            }
        }
    }
}

struct AppEnv {
    clock: ManualClock,
    api: Api,
}

impl HasClock for AppEnv {
    type Clock = ManualClock;

    fn clock(&self) -> &ManualClock {
        &self.clock
    }
}

/// Keeps every loaded user
struct UsersReducer;

impl Reducer for UsersReducer {
    type State = AppState;
    type Action = AppAction;
    type Environment = AppEnv;

    fn reduce(
        &self,
        state: &mut AppState,
        action: AppAction,
        _env: &AppEnv,
    ) -> SmallVec<[Effect<AppAction>; 4]> {
        match action {
            AppAction::Users(notification) if status::is_complete(&notification) => {
                if let Some(user) = notification.payload {
                    state.users.insert(user.id, user);
                }
            },
            AppAction::Logout => state.users.clear(),
            AppAction::Users(_) => {},
        }
        smallvec![Effect::None]
    }
}

type AppStore = Store<AppState, AppAction, AppEnv, CombinedReducer<AppState, AppAction, AppEnv>>;

fn app_store() -> AppStore {
    let reducer = combine_reducers(vec![
        Box::new(scope_reducer(
            AsyncActionReducer::<AppAction, AppEnv>::new(),
            |s: &mut AppState| &mut s.async_actions,
        )),
        Box::new(UsersReducer),
    ]);
    let env = AppEnv {
        clock: ManualClock::default(),
        api: Api::default(),
    };
    Store::new(AppState::default(), reducer, env)
}

async fn load_user(
    orchestrator: &Orchestrator<User, ManualClock>,
    store: &AppStore,
    id: u32,
    options: AsyncActionOptions,
) -> Result<User, AsyncError> {
    orchestrator
        .begin_operation(
            SimpleAction::new("GET_USER"),
            move |host: AppStore| host.environment().api.get_user(id),
            options.with_identifier(id.to_string()),
        )
        .run(store.clone())
        .await
}

fn orchestrator_for(store: &AppStore) -> Orchestrator<User, ManualClock> {
    Orchestrator::new(store.environment().clock.clone())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_lifecycle_and_app_reducers_both_see_notifications() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);

    let user = load_user(&orchestrator, &store, 7, AsyncActionOptions::new()).await.unwrap();

    assert_eq!(user.name, "user-7");
    store.state(|s| {
        assert_eq!(s.users.get(&7), Some(&user));
        assert!(!selectors::is_pending(s, "GET_USER", Some("7"), true));
        assert!(s.async_actions.record("GET_USER", Some("7")).is_some_and(|r| r.completed));
    });

    store.send(AppAction::Logout).unwrap();
    assert!(store.state(|s| s.users.is_empty()));
    assert!(store.state(|s| s.async_actions.record("GET_USER", Some("7")).is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_deduplicate_on_a_threaded_runtime() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let store = store.clone();
            tokio::spawn(async move {
                load_user(&orchestrator, &store, 42, AsyncActionOptions::new()).await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().id, 42);
    }

    assert_eq!(store.environment().api.calls(), 1);
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_store_broadcasts_notifications_in_order() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);
    let mut actions = store.subscribe_actions();

    let cached = AsyncActionOptions::new().with_cache(true);
    load_user(&orchestrator, &store, 3, cached.clone()).await.unwrap();
    load_user(&orchestrator, &store, 3, cached).await.unwrap();

    let mut statuses = Vec::new();
    while let Ok(action) = actions.try_recv() {
        if let Some(meta) = action.lifecycle_meta() {
            statuses.push(meta.status);
        }
    }
    assert_eq!(
        statuses,
        vec![LifecycleStatus::Pending, LifecycleStatus::Complete, LifecycleStatus::Cached]
    );
    assert_eq!(store.environment().api.calls(), 1);
}

#[tokio::test]
async fn test_initial_request_selector_tells_first_load_from_refresh() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);
    let initial = IsInitialRequestPendingSelector::<User>::new("GET_USER", Some("5"), false);

    let mut first = Box::pin(load_user(&orchestrator, &store, 5, AsyncActionOptions::new()));
    assert!(futures::poll!(&mut first).is_pending());
    assert!(store.state(|s| initial.select(s)));
    first.await.unwrap();
    assert!(!store.state(|s| initial.select(s)));

    let mut refresh = Box::pin(load_user(&orchestrator, &store, 5, AsyncActionOptions::new()));
    assert!(futures::poll!(&mut refresh).is_pending());
    assert!(store.state(|s| selectors::is_pending(s, "GET_USER", Some("5"), false)));
    assert!(!store.state(|s| initial.select(s)));
    refresh.await.unwrap();
}

#[tokio::test]
async fn test_operation_failure_is_recorded_and_returned() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);

    let error = load_user(&orchestrator, &store, 0, AsyncActionOptions::new())
        .await
        .unwrap_err();

    let failure = error.failure().expect("operation failure");
    assert!(failure.downcast_ref::<NotFound>().is_some());

    let recorded = store.state(|s| selectors::error(s, "GET_USER", Some("0"))).unwrap();
    assert_eq!(recorded.name, "NotFound");
    assert_eq!(recorded.message, "user 0 not found");
}

#[tokio::test]
async fn test_listener_failure_surfaces_instead_of_operation_error() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);
    store.add_listener(|action: &AppAction| match action {
        AppAction::Users(notification) if status::is_failed(notification) => {
            Err("error banner crashed".to_owned())
        },
        _ => Ok(()),
    });

    let error = load_user(&orchestrator, &store, 0, AsyncActionOptions::new())
        .await
        .unwrap_err();

    assert_eq!(
        error,
        AsyncError::Dispatch(DispatchError::Rejected("error banner crashed".to_owned()))
    );
    assert!(store.state(|s| selectors::error(s, "GET_USER", Some("0"))).is_some());
    assert_eq!(orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_shutdown_store_rejects_orchestrated_operations() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);
    store.shutdown(Duration::from_secs(1)).await.unwrap();

    let error = load_user(&orchestrator, &store, 1, AsyncActionOptions::new())
        .await
        .unwrap_err();

    assert_eq!(error, AsyncError::Dispatch(DispatchError::ShutdownInProgress));
    assert_eq!(store.environment().api.calls(), 0);
}

#[tokio::test]
async fn test_cache_expires_with_store_clock() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);
    let cached = AsyncActionOptions::new().with_cache(true).with_ttl_seconds(300);

    load_user(&orchestrator, &store, 9, cached.clone()).await.unwrap();
    store.environment().clock.advance_seconds(299);
    load_user(&orchestrator, &store, 9, cached.clone()).await.unwrap();
    assert_eq!(store.environment().api.calls(), 1);

    store.environment().clock.advance_seconds(1);
    load_user(&orchestrator, &store, 9, cached).await.unwrap();
    assert_eq!(store.environment().api.calls(), 2);
}

#[tokio::test]
async fn test_reset_through_store() {
    let store = app_store();
    let orchestrator = orchestrator_for(&store);

    load_user(&orchestrator, &store, 4, AsyncActionOptions::new()).await.unwrap();
    orchestrator
        .reset_operation(&store, SimpleAction::new("GET_USER"), Some("4"))
        .unwrap();

    assert!(store.state(|s| s.async_actions.is_empty()));
    assert!(store.state(|s| s.users.contains_key(&4)));
}
