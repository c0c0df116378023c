//! # Async Lifecycle Testing
//!
//! Testing utilities for code built on async lifecycle tracking.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], advanceable [`ManualClock`])
//! - [`MockHost`], a host that records every lifecycle notification
//! - [`ReducerTest`], a Given-When-Then builder for reducers
//! - Assertion helpers for effects and lifecycle state
//!
//! ## Example
//!
//! ```ignore
//! use async_lifecycle_testing::{ManualClock, MockHost};
//!
//! #[tokio::test]
//! async fn test_user_is_cached() {
//!     let clock = ManualClock::default();
//!     let host = MockHost::with_clock((), clock.clone());
//!     let orchestrator = Orchestrator::new(clock.clone());
//!
//!     fetch_user(&orchestrator, host.clone()).await.unwrap();
//!     fetch_user(&orchestrator, host.clone()).await.unwrap();
//!
//!     assert_eq!(
//!         host.statuses(),
//!         vec![LifecycleStatus::Pending, LifecycleStatus::Complete, LifecycleStatus::Cached]
//!     );
//! }
//! ```

use async_lifecycle_core::environment::Clock;
use chrono::{DateTime, Utc};

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use async_lifecycle_testing::mocks::FixedClock;
    /// use async_lifecycle_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can hand one clone to an
    /// orchestrator and another to the host, then advance both at once.
    ///
    /// ```
    /// use async_lifecycle_testing::mocks::ManualClock;
    /// use async_lifecycle_core::environment::Clock;
    ///
    /// let clock = ManualClock::default();
    /// let start = clock.epoch_seconds();
    /// clock.advance_seconds(90);
    /// assert_eq!(clock.epoch_seconds(), start + 90);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward by `seconds`
        pub fn advance_seconds(&self, seconds: i64) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += chrono::Duration::seconds(seconds);
        }
    }

    impl Default for ManualClock {
        /// Stopped at the same instant as [`test_clock`]
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

mod mock_host;

// Re-export commonly used items
pub use mock_host::MockHost;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
