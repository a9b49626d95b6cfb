//! # Kiosk Testing
//!
//! Testing utilities for the attendance kiosk.
//!
//! This crate provides:
//! - Deterministic clocks
//! - A Given-When-Then harness and effect assertions for reducers
//! - In-memory attendee registry and attendance ledger
//! - A scripted camera that replays decoded frames on a timeline
//!
//! The in-memory stores double as the storage backend of the server when no
//! database is configured.
//!
//! ## Example
//!
//! ```ignore
//! use kiosk_testing::{test_clock, InMemoryAttendanceLedger, InMemoryAttendeeRegistry};
//!
//! #[tokio::test]
//! async fn test_mark_attendance() {
//!     let registry = InMemoryAttendeeRegistry::with_attendees(sample_attendees());
//!     let ledger = InMemoryAttendanceLedger::new();
//!     let service = AttendanceService::new(registry, ledger, test_clock());
//!
//!     let outcome = service.mark_attendance(&"user1".into(), &"Event A".into()).await;
//!     assert!(outcome.is_ok());
//! }
//! ```

use chrono::{DateTime, Utc};
use kiosk_core::environment::Clock;


/// In-memory registry and ledger
pub mod stores;

/// Scripted camera for scanner tests
pub mod camera;

/// Mock implementations of Environment traits
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
    /// use kiosk_testing::mocks::FixedClock;
    /// use kiosk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
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

    /// Clock that only moves when told to
    ///
    /// Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch_2025())
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn epoch_2025() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }
}

pub use camera::{ScriptedCamera, ScriptedFrame};
pub use mocks::{FixedClock, ManualClock, epoch_2025, test_clock};
pub use reducer_test::ReducerTest;
pub use stores::{InMemoryAttendanceLedger, InMemoryAttendeeRegistry};
