//! Lifecycle state: `operation type -> identifier -> status record`
//!
//! The per-type record tables sit behind `Arc`s and are updated
//! copy-on-write, so an update to one operation type leaves every other
//! type's table pointer-identical. Memoised selectors rely on that.

use crate::error::ErrorInfo;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A successful payload kept for later cache hits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse<P> {
    /// The cached payload
    pub value: P,
    /// When the payload was captured, in whole seconds since the Unix epoch
    pub captured_at_epoch_seconds: i64,
}

impl<P> CachedResponse<P> {
    /// Age in seconds at `now_epoch_seconds`
    #[must_use]
    pub const fn age_seconds(&self, now_epoch_seconds: i64) -> i64 {
        now_epoch_seconds - self.captured_at_epoch_seconds
    }

    /// True if the entry is younger than `ttl_seconds` (or there is no TTL)
    #[must_use]
    pub fn is_fresh(&self, ttl_seconds: Option<u64>, now_epoch_seconds: i64) -> bool {
        ttl_seconds.is_none_or(|ttl| {
            i128::from(self.age_seconds(now_epoch_seconds)) < i128::from(ttl)
        })
    }
}

/// Derived status of one operation key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "P: Deserialize<'de>"))]
pub struct StatusRecord<P> {
    /// An operation for this key is in flight
    pub pending: bool,

    /// The key has completed successfully at least once
    #[serde(default)]
    pub completed: bool,

    /// Normalised error from the last failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Cached response from the last cached completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_response: Option<CachedResponse<P>>,
}

impl<P> Default for StatusRecord<P> {
    fn default() -> Self {
        Self {
            pending: false,
            completed: false,
            error: None,
            cached_response: None,
        }
    }
}

impl<P> StatusRecord<P> {
    /// A record with only `pending` set
    #[must_use]
    pub fn pending() -> Self {
        Self {
            pending: true,
            ..Self::default()
        }
    }
}

/// Records of one operation type, keyed by identifier (`""` when absent)
pub type OperationRecords<P> = IndexMap<String, StatusRecord<P>>;

/// Lifecycle state maintained by [`AsyncActionReducer`](crate::AsyncActionReducer)
///
/// Keyed first by operation type, then by identifier. Iteration follows
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AsyncActionState<P> {
    operations: IndexMap<String, Arc<OperationRecords<P>>>,
}

impl<P> Default for AsyncActionState<P> {
    fn default() -> Self {
        Self {
            operations: IndexMap::new(),
        }
    }
}

impl<P> AsyncActionState<P> {
    /// Create an empty state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no operation type has any record
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operation types with at least one record, in insertion order
    pub fn operation_types(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// The shared record table of an operation type
    #[must_use]
    pub fn records(&self, operation_type: &str) -> Option<&Arc<OperationRecords<P>>> {
        self.operations.get(operation_type)
    }

    /// The record at a key
    #[must_use]
    pub fn record(&self, operation_type: &str, identifier: Option<&str>) -> Option<&StatusRecord<P>> {
        self.records(operation_type)?
            .get(identifier.unwrap_or_default())
    }

    /// Remove the record at a key
    ///
    /// An operation type left without records is removed as well, so the key
    /// reads exactly as if it had never been recorded.
    pub fn remove(&mut self, operation_type: &str, identifier: Option<&str>) -> Option<StatusRecord<P>>
    where
        P: Clone,
    {
        let records = self.operations.get_mut(operation_type)?;
        if !records.contains_key(identifier.unwrap_or_default()) {
            return None;
        }
        let removed = Arc::make_mut(records).shift_remove(identifier.unwrap_or_default());
        if records.is_empty() {
            self.operations.shift_remove(operation_type);
        }
        removed
    }
}

impl<P: Clone> AsyncActionState<P> {
    /// Replace the record at a key with the one built by `update`
    ///
    /// `update` sees the previous record, if any. Only the affected operation
    /// type's table is copied, and only when it is shared.
    pub fn upsert<F>(&mut self, operation_type: &str, identifier: Option<&str>, update: F)
    where
        F: FnOnce(Option<&StatusRecord<P>>) -> StatusRecord<P>,
    {
        let identifier = identifier.unwrap_or_default();
        let records = self.operations.entry(operation_type.to_owned()).or_default();
        let next = update(records.get(identifier));
        Arc::make_mut(records).insert(identifier.to_owned(), next);
    }

    /// Builder form of [`upsert`](Self::upsert) for seeding state
    #[must_use]
    pub fn with_record(
        mut self,
        operation_type: &str,
        identifier: Option<&str>,
        record: StatusRecord<P>,
    ) -> Self {
        self.upsert(operation_type, identifier, |_| record);
        self
    }
}

/// Application state that holds the lifecycle mapping at an agreed location
///
/// Conventionally the mapping lives in a field named `async_actions`.
/// Returning `None` is treated as an empty mapping.
///
/// ```
/// use async_lifecycle_core::{AsyncActionState, HasAsyncActions};
///
/// #[derive(Clone, Default)]
/// struct AppState {
///     async_actions: AsyncActionState<String>,
///     user_name: Option<String>,
/// }
///
/// impl HasAsyncActions for AppState {
///     type Payload = String;
///
///     fn async_actions(&self) -> Option<&AsyncActionState<String>> {
///         Some(&self.async_actions)
///     }
/// }
/// ```
pub trait HasAsyncActions {
    /// Payload type of the cached responses
    type Payload;

    /// Borrow the lifecycle mapping, if present
    fn async_actions(&self) -> Option<&AsyncActionState<Self::Payload>>;
}

impl<P> HasAsyncActions for AsyncActionState<P> {
    type Payload = P;

    fn async_actions(&self) -> Option<&Self> {
        Some(self)
    }
}

impl<T: HasAsyncActions> HasAsyncActions for Option<T> {
    type Payload = T::Payload;

    fn async_actions(&self) -> Option<&AsyncActionState<T::Payload>> {
        self.as_ref().and_then(HasAsyncActions::async_actions)
    }
}
