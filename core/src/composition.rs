//! Reducer composition utilities
//!
//! - **`combine_reducers`**: Run multiple reducers on the same state/action
//! - **`scope_reducer`**: Focus a reducer on a field of a larger state
//!
//! Together they register the lifecycle reducer alongside an application's
//! own reducers.
//!
//! # Examples
//!
//! ```
//! use async_lifecycle_core::composition::{combine_reducers, scope_reducer};
//! use async_lifecycle_core::environment::SystemClock;
//! use async_lifecycle_core::reducer::Reducer;
//! use async_lifecycle_core::{
//!     AsyncAction, AsyncActionReducer, AsyncActionState, AsyncMeta, IntoLifecycle, Lifecycle,
//!     SimpleAction, SmallVec, effect::Effect, smallvec, status,
//! };
//!
//! #[derive(Clone, Default)]
//! struct AppState {
//!     async_actions: AsyncActionState<String>,
//!     greeting: Option<String>,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum AppAction {
//!     Greeting(AsyncAction<SimpleAction, String>),
//! }
//!
//! impl IntoLifecycle for AppAction {
//!     type Payload = String;
//!
//!     fn lifecycle_meta(&self) -> Option<&AsyncMeta> {
//!         match self {
//!             AppAction::Greeting(n) => n.lifecycle_meta(),
//!         }
//!     }
//!
//!     fn into_lifecycle(self) -> Option<Lifecycle<String>> {
//!         match self {
//!             AppAction::Greeting(n) => n.into_lifecycle(),
//!         }
//!     }
//! }
//!
//! struct GreetingReducer;
//!
//! impl Reducer for GreetingReducer {
//!     type State = AppState;
//!     type Action = AppAction;
//!     type Environment = SystemClock;
//!
//!     fn reduce(&self, state: &mut AppState, action: AppAction, _env: &SystemClock) -> SmallVec<[Effect<AppAction>; 4]> {
//!         let AppAction::Greeting(notification) = action;
//!         if status::is_complete(&notification) {
//!             state.greeting = notification.payload;
//!         }
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! let app = combine_reducers(vec![
//!     Box::new(scope_reducer(
//!         AsyncActionReducer::<AppAction, SystemClock>::new(),
//!         |s: &mut AppState| &mut s.async_actions,
//!     )),
//!     Box::new(GreetingReducer),
//! ]);
//!
//! let mut state = AppState::default();
//! let hello = AsyncAction::complete(SimpleAction::new("GREET"), None, "hello".to_owned(), false);
//! let _ = app.reduce(&mut state, AppAction::Greeting(hello), &SystemClock);
//!
//! assert_eq!(state.greeting.as_deref(), Some("hello"));
//! assert!(state.async_actions.record("GREET", None).is_some_and(|r| r.completed));
//! ```

use crate::effect::Effect;
use crate::reducer::Reducer;

/// Combines multiple reducers that operate on the same state and action types.
///
/// Each reducer is run in sequence, and all effects are collected and concatenated.
///
/// # Type Parameters
///
/// - `S`: The state type
/// - `A`: The action type
/// - `E`: The environment type
#[must_use]
pub fn combine_reducers<S, A, E>(
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
) -> CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    reducers: Vec<Box<dyn Reducer<State = S, Action = A, Environment = E> + Send + Sync>>,
}

impl<S, A, E> Reducer for CombinedReducer<S, A, E>
where
    S: 'static,
    A: Clone + 'static,
    E: 'static,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> smallvec::SmallVec<[Effect<Self::Action>; 4]> {
        let mut all_effects = smallvec::SmallVec::new();

        for reducer in &self.reducers {
            let effects = reducer.reduce(state, action.clone(), env);
            all_effects.extend(effects);
        }

        all_effects
    }
}

/// Scopes a reducer to operate on a field of a larger state.
///
/// The reducer works on the field in place through `lens`. Nothing is
/// cloned, so the lifecycle mapping keeps its structural sharing.
///
/// # Type Parameters
///
/// - `S`: The parent state type
/// - `SubS`: The child state type (a field of `S`)
/// - `A`: The action type
/// - `E`: The environment type
pub fn scope_reducer<S, SubS, A, E, R>(
    reducer: R,
    lens: fn(&mut S) -> &mut SubS,
) -> ScopedReducer<S, SubS, A, E, R>
where
    S: 'static,
    SubS: 'static,
    A: 'static,
    E: 'static,
    R: Reducer<State = SubS, Action = A, Environment = E>,
{
    ScopedReducer {
        reducer,
        lens,
        _phantom: std::marker::PhantomData,
    }
}

/// A scoped reducer that operates on a field of a larger state.
///
/// Created by [`scope_reducer`].
pub struct ScopedReducer<S, SubS, A, E, R>
where
    S: 'static,
    SubS: 'static,
    A: 'static,
    E: 'static,
    R: Reducer<State = SubS, Action = A, Environment = E>,
{
    reducer: R,
    lens: fn(&mut S) -> &mut SubS,
    _phantom: std::marker::PhantomData<fn() -> (A, E)>,
}

impl<S, SubS, A, E, R> Reducer for ScopedReducer<S, SubS, A, E, R>
where
    S: 'static,
    SubS: 'static,
    A: 'static,
    E: 'static,
    R: Reducer<State = SubS, Action = A, Environment = E>,
{
    type State = S;
    type Action = A;
    type Environment = E;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> smallvec::SmallVec<[Effect<Self::Action>; 4]> {
        self.reducer.reduce((self.lens)(state), action, env)
    }
}
