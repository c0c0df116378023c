//! Lifecycle notifications
//!
//! A notification is the caller's own action descriptor decorated with a
//! payload, an error and lifecycle metadata. The caller owns the descriptor;
//! the orchestrator owns `payload`, `error` and `meta`.
//!
//! Serialized, a notification has the shape
//!
//! ```text
//! { ...callerFields, payload: T|null, error: Error|null,
//!   meta: { status: "ASYNC_*", identifier?: string, cache?: true } }
//! ```

use crate::error::FailureValue;
use crate::status::LifecycleStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller action descriptors name the operation they belong to
///
/// The operation type is the first half of an [`OperationKey`].
pub trait OperationType {
    /// The operation type, e.g. `GET_USER`
    fn operation_type(&self) -> &str;
}

impl OperationType for String {
    fn operation_type(&self) -> &str {
        self
    }
}

impl OperationType for &'static str {
    fn operation_type(&self) -> &str {
        self
    }
}

/// An action descriptor that carries nothing but its type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleAction {
    /// The operation type
    #[serde(rename = "type")]
    pub action_type: String,
}

impl SimpleAction {
    /// Create a descriptor for the given operation type
    #[must_use]
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
        }
    }
}

impl OperationType for SimpleAction {
    fn operation_type(&self) -> &str {
        &self.action_type
    }
}

/// Identifies one logical recurring operation
///
/// Concurrent instances of the same operation type are told apart by the
/// optional identifier. An absent identifier addresses the same record as
/// the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationKey {
    operation_type: String,
    identifier: Option<String>,
}

impl OperationKey {
    /// Create a key from an operation type and optional identifier
    #[must_use]
    pub fn new(operation_type: impl Into<String>, identifier: Option<&str>) -> Self {
        Self {
            operation_type: operation_type.into(),
            identifier: identifier.filter(|id| !id.is_empty()).map(str::to_owned),
        }
    }

    /// The operation type
    #[must_use]
    pub fn operation_type(&self) -> &str {
        &self.operation_type
    }

    /// The identifier, if one was given
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({})",
            self.operation_type,
            self.identifier.as_deref().unwrap_or_default()
        )
    }
}

/// Lifecycle metadata attached to every notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncMeta {
    /// Which lifecycle transition this notification reports
    pub status: LifecycleStatus,

    /// Disambiguates concurrent instances of the same operation type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    /// Set on `COMPLETE` when the payload should be kept as a cached response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
}

impl AsyncMeta {
    /// Metadata without a cache request
    #[must_use]
    pub fn new(status: LifecycleStatus, identifier: Option<&str>) -> Self {
        Self {
            status,
            identifier: identifier.map(str::to_owned),
            cache: None,
        }
    }

    /// True if the reducer should keep the payload as a cached response
    #[must_use]
    pub fn wants_cache(&self) -> bool {
        self.cache == Some(true)
    }
}

/// A lifecycle notification for the caller action `A` with payload `P`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AsyncAction<A, P> {
    /// Caller-supplied descriptor, flattened into the notification
    #[serde(flatten)]
    pub action: A,

    /// Result of the operation (`COMPLETE`, `CACHED`), otherwise `None`
    pub payload: Option<P>,

    /// Raw failure (`FAILED`), otherwise `None`
    pub error: Option<FailureValue>,

    /// Lifecycle metadata
    pub meta: AsyncMeta,
}

impl<A, P> AsyncAction<A, P> {
    fn bare(action: A, status: LifecycleStatus, identifier: Option<&str>) -> Self {
        Self {
            action,
            payload: None,
            error: None,
            meta: AsyncMeta::new(status, identifier),
        }
    }

    /// The operation has started
    #[must_use]
    pub fn pending(action: A, identifier: Option<&str>) -> Self {
        Self::bare(action, LifecycleStatus::Pending, identifier)
    }

    /// An identical operation is already in flight
    #[must_use]
    pub fn deduped(action: A, identifier: Option<&str>) -> Self {
        Self::bare(action, LifecycleStatus::Deduped, identifier)
    }

    /// The operation resolved with `payload`; `cache` asks the reducer to keep it
    #[must_use]
    pub fn complete(action: A, identifier: Option<&str>, payload: P, cache: bool) -> Self {
        let mut notification = Self::bare(action, LifecycleStatus::Complete, identifier);
        notification.payload = Some(payload);
        notification.meta.cache = cache.then_some(true);
        notification
    }

    /// A cached response was served
    #[must_use]
    pub fn cached(action: A, identifier: Option<&str>, payload: P) -> Self {
        let mut notification = Self::bare(action, LifecycleStatus::Cached, identifier);
        notification.payload = Some(payload);
        notification
    }

    /// The operation failed with `error`
    #[must_use]
    pub fn failed(action: A, identifier: Option<&str>, error: FailureValue) -> Self {
        let mut notification = Self::bare(action, LifecycleStatus::Failed, identifier);
        notification.error = Some(error);
        notification
    }

    /// Discard the status record for the key
    #[must_use]
    pub fn reset(action: A, identifier: Option<&str>) -> Self {
        Self::bare(action, LifecycleStatus::Reset, identifier)
    }
}

impl<A: OperationType, P> AsyncAction<A, P> {
    /// The key this notification addresses
    #[must_use]
    pub fn key(&self) -> OperationKey {
        OperationKey::new(self.action.operation_type(), self.meta.identifier.as_deref())
    }
}

/// Build a `RESET` notification from a bare operation type
///
/// ```
/// use async_lifecycle_core::{reset_async_action, LifecycleStatus};
///
/// let reset = reset_async_action::<()>("GET_USER", Some("42"));
/// assert_eq!(reset.meta.status, LifecycleStatus::Reset);
/// assert!(reset.payload.is_none() && reset.error.is_none());
/// ```
#[must_use]
pub fn reset_async_action<P>(
    operation_type: impl Into<String>,
    identifier: Option<&str>,
) -> AsyncAction<SimpleAction, P> {
    AsyncAction::reset(SimpleAction::new(operation_type), identifier)
}

/// A notification taken apart for the lifecycle reducer
#[derive(Debug, Clone)]
pub struct Lifecycle<P> {
    /// Operation type of the caller descriptor
    pub operation_type: String,
    /// Lifecycle metadata
    pub meta: AsyncMeta,
    /// Payload, if any
    pub payload: Option<P>,
    /// Raw failure, if any
    pub error: Option<FailureValue>,
}

/// Host actions that may carry lifecycle metadata
///
/// The lifecycle reducer is registered against the host's whole action type.
/// Actions that are not lifecycle notifications return `None` and leave the
/// lifecycle state untouched.
///
/// ```ignore
/// impl IntoLifecycle for AppAction {
///     type Payload = ApiResponse;
///
///     fn lifecycle_meta(&self) -> Option<&AsyncMeta> {
///         match self {
///             AppAction::Api(notification) => notification.lifecycle_meta(),
///             _ => None,
///         }
///     }
///
///     fn into_lifecycle(self) -> Option<Lifecycle<ApiResponse>> {
///         match self {
///             AppAction::Api(notification) => notification.into_lifecycle(),
///             _ => None,
///         }
///     }
/// }
/// ```
pub trait IntoLifecycle {
    /// Payload type carried by lifecycle notifications
    type Payload;

    /// Borrow the lifecycle metadata, if this action carries any
    fn lifecycle_meta(&self) -> Option<&AsyncMeta>;

    /// Take the action apart, if it is a lifecycle notification
    fn into_lifecycle(self) -> Option<Lifecycle<Self::Payload>>;
}

impl<A: OperationType, P> IntoLifecycle for AsyncAction<A, P> {
    type Payload = P;

    fn lifecycle_meta(&self) -> Option<&AsyncMeta> {
        Some(&self.meta)
    }

    fn into_lifecycle(self) -> Option<Lifecycle<P>> {
        Some(Lifecycle {
            operation_type: self.action.operation_type().to_owned(),
            meta: self.meta,
            payload: self.payload,
            error: self.error,
        })
    }
}
