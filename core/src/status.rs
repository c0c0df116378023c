//! Lifecycle status tags and notification predicates
//!
//! Every notification emitted by the orchestrator carries exactly one
//! [`LifecycleStatus`]. For a single operation key the orchestrator guarantees
//! `Pending` is followed by exactly one of `Complete` or `Failed`; `Deduped`
//! and `Cached` are terminal single-notification paths.

use crate::action::IntoLifecycle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status tag carried in a notification's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStatus {
    /// The operation has started and is in flight
    #[serde(rename = "ASYNC_PENDING")]
    Pending,
    /// The operation resolved successfully
    #[serde(rename = "ASYNC_COMPLETE")]
    Complete,
    /// The operation failed
    #[serde(rename = "ASYNC_FAILED")]
    Failed,
    /// An identical operation was already in flight; the caller shares its result
    #[serde(rename = "ASYNC_DEDUPED")]
    Deduped,
    /// A valid cached response was served without running the operation
    #[serde(rename = "ASYNC_CACHED")]
    Cached,
    /// The status record for the key should be discarded
    #[serde(rename = "ASYNC_RESET")]
    Reset,
}

impl LifecycleStatus {
    /// The wire tag, e.g. `ASYNC_PENDING`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "ASYNC_PENDING",
            Self::Complete => "ASYNC_COMPLETE",
            Self::Failed => "ASYNC_FAILED",
            Self::Deduped => "ASYNC_DEDUPED",
            Self::Cached => "ASYNC_CACHED",
            Self::Reset => "ASYNC_RESET",
        }
    }

    /// Short lowercase label used for metrics and log fields
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Deduped => "deduped",
            Self::Cached => "cached",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn status_of<N: IntoLifecycle>(notification: &N) -> Option<LifecycleStatus> {
    notification.lifecycle_meta().map(|meta| meta.status)
}

/// True if the notification announces an operation going in flight
#[must_use]
pub fn is_pending<N: IntoLifecycle>(notification: &N) -> bool {
    status_of(notification) == Some(LifecycleStatus::Pending)
}

/// True if the notification delivers a result, fresh (`COMPLETE`) or cached (`CACHED`)
#[must_use]
pub fn is_complete<N: IntoLifecycle>(notification: &N) -> bool {
    matches!(
        status_of(notification),
        Some(LifecycleStatus::Complete | LifecycleStatus::Cached)
    )
}

/// True if the notification reports a failure
#[must_use]
pub fn is_failed<N: IntoLifecycle>(notification: &N) -> bool {
    status_of(notification) == Some(LifecycleStatus::Failed)
}

/// True if the notification resets the key's status record
#[must_use]
pub fn is_being_reset<N: IntoLifecycle>(notification: &N) -> bool {
    status_of(notification) == Some(LifecycleStatus::Reset)
}
