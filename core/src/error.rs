//! Failure values and their normalised form
//!
//! A `FAILED` notification carries the operation's raw failure as a
//! [`FailureValue`]. The reducer keeps only its normalised [`ErrorInfo`]
//! shape in state, falling back to `"UNKNOWN"` for values that are not
//! structured errors.

use serde::{Deserialize, Serialize, Serializer};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Normalised error shape kept in a status record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error kind, e.g. the error's type name
    pub name: String,
    /// Human readable message
    pub message: String,
    /// Rendered cause chain, when one is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Fallback for names and messages that cannot be determined
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// `{ name: "UNKNOWN", message: "UNKNOWN" }`
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: Self::UNKNOWN.to_owned(),
            message: Self::UNKNOWN.to_owned(),
            stack: None,
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

fn non_empty_or_unknown(value: Option<&str>) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or(ErrorInfo::UNKNOWN)
        .to_owned()
}

/// Last path segment of a type name, without generic arguments
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// The raw failure an operation produced
///
/// Structured errors keep the original value behind an `Arc` so every caller
/// sharing a deduplicated result observes the same error, and can downcast it.
/// Anything else (a bare string, a number, an arbitrary JSON document) is a
/// `Value`.
#[derive(Clone)]
pub enum FailureValue {
    /// A `std::error::Error` together with its type name
    Error {
        /// Type name captured when the error was wrapped
        name: String,
        /// The original error
        error: Arc<dyn StdError + Send + Sync>,
    },
    /// A non-error value
    Value(serde_json::Value),
}

impl FailureValue {
    /// Wrap a structured error, capturing its type name
    #[must_use]
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Error {
            name: short_type_name::<E>().to_owned(),
            error: Arc::new(error),
        }
    }

    /// Wrap an arbitrary non-error value
    #[must_use]
    pub fn value(value: impl Into<serde_json::Value>) -> Self {
        Self::Value(value.into())
    }

    /// Borrow the structured error, if this is one
    #[must_use]
    pub fn as_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Error { error, .. } => Some(error.as_ref()),
            Self::Value(_) => None,
        }
    }

    /// Downcast the structured error to its concrete type
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.as_error().and_then(|error| error.downcast_ref::<E>())
    }

    /// Normalise into the shape kept in state
    ///
    /// - structured errors: `name` is the captured type name, `message` the
    ///   error's `Display`, `stack` the error followed by its `source()` chain
    /// - JSON objects: `name`, `message` and `stack` string fields are used
    ///   when present
    /// - anything else: `{ name: "UNKNOWN", message: "UNKNOWN" }`
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        match self {
            Self::Error { name, error } => {
                let message = error.to_string();
                let mut stack = format!("{name}: {message}");
                let mut source = error.source();
                while let Some(cause) = source {
                    stack.push_str("\n    caused by: ");
                    stack.push_str(&cause.to_string());
                    source = cause.source();
                }
                ErrorInfo {
                    name: non_empty_or_unknown(Some(name.as_str())),
                    message: non_empty_or_unknown(Some(message.as_str())),
                    stack: Some(stack),
                }
            },
            Self::Value(serde_json::Value::Object(fields)) => {
                let field = |key: &str| fields.get(key).and_then(serde_json::Value::as_str);
                ErrorInfo {
                    name: non_empty_or_unknown(field("name")),
                    message: non_empty_or_unknown(field("message")),
                    stack: field("stack").map(str::to_owned),
                }
            },
            Self::Value(_) => ErrorInfo::unknown(),
        }
    }
}

impl<E> From<E> for FailureValue
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::from_error(error)
    }
}

impl fmt::Debug for FailureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error { name, error } => f
                .debug_struct("FailureValue::Error")
                .field("name", name)
                .field("error", error)
                .finish(),
            Self::Value(value) => f.debug_tuple("FailureValue::Value").field(value).finish(),
        }
    }
}

impl fmt::Display for FailureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error { error, .. } => write!(f, "{error}"),
            Self::Value(value) => write!(f, "{value}"),
        }
    }
}

impl PartialEq for FailureValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Error { name: a, error: x }, Self::Error { name: b, error: y }) => {
                a == b && x.to_string() == y.to_string()
            },
            (Self::Value(a), Self::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl Serialize for FailureValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Error { .. } => self.error_info().serialize(serializer),
            Self::Value(value) => value.serialize(serializer),
        }
    }
}

/// A notification could not be delivered to the host store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The store no longer accepts actions
    #[error("Store is shutting down")]
    ShutdownInProgress,

    /// The store's state lock was poisoned by a panicking reducer
    #[error("Store state lock poisoned")]
    LockPoisoned,

    /// A downstream consumer rejected the notification
    #[error("Notification rejected: {0}")]
    Rejected(String),
}
