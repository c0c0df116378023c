//! The boundary between the orchestrator and the store it reports into
//!
//! An orchestrated operation needs three things from its host: a way to
//! dispatch notifications, a way to read the current state, and the host's
//! extra argument (typically its environment). [`Host`] bundles them.

use crate::error::DispatchError;

/// A store that lifecycle notifications can be dispatched into
///
/// Dispatch must be synchronous with respect to state: once `dispatch`
/// returns `Ok`, a subsequent `with_state` observes the reduced notification.
/// The orchestrator's deduplication relies on this.
pub trait Host: Clone + Send + Sync + 'static {
    /// Application state
    type State;

    /// Application action
    type Action;

    /// Extra argument forwarded to operations
    type Extra;

    /// Reduce `action` into the state and notify observers
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if the store rejects the action or a
    /// downstream consumer fails while handling it.
    fn dispatch(&self, action: Self::Action) -> Result<(), DispatchError>;

    /// Read the current state
    fn with_state<T>(&self, f: impl FnOnce(&Self::State) -> T) -> T;

    /// The extra argument
    fn extra(&self) -> &Self::Extra;
}
