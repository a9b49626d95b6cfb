//! Attendance validation service.
//!
//! Decides whether a scanned attendee may be marked present at an event and
//! writes the attendance record when they may:
//!
//! 1. Unknown attendee → [`AttendanceError::NotRegistered`]
//! 2. Event not in the attendee's registrations → [`AttendanceError::NotRegistered`]
//! 3. Record already present → [`AttendanceError::AlreadyMarked`]
//! 4. Otherwise the record is written with the current time
//!
//! Step 3 is a fast path. The write itself is a conditional insert, so two
//! concurrent scans of the same code still produce exactly one record.

use kiosk_core::attendance::{
    AttendanceLedger, AttendanceRecord, Attendee, AttendeeId, AttendeeRegistry, EventName,
    InsertOutcome, StorageError,
};
use kiosk_core::environment::Clock;
use std::sync::Arc;
use thiserror::Error;

/// Message returned when attendance is recorded
pub const MARKED_MESSAGE: &str = "Attendance marked successfully";

/// Message returned when the sample attendees were loaded
pub const SEEDED_MESSAGE: &str = "Users added successfully";

/// Message returned when loading the sample attendees failed
pub const SEED_FAILED_MESSAGE: &str = "Error adding users";

/// Message returned when an event's attendance could not be read
pub const LIST_FAILED_MESSAGE: &str = "Error loading attendance";

/// Why attendance could not be marked
///
/// The `Display` text is what the operator sees.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    /// Attendee unknown or not registered for the event
    #[error("User not registered for this event")]
    NotRegistered,

    /// A record for this attendee and event already exists
    #[error("Attendance already marked for this user")]
    AlreadyMarked,

    /// A store failed; surfaced as is, never retried
    #[error("Error marking attendance")]
    Storage(#[from] StorageError),
}

impl AttendanceError {
    /// Label used in metrics
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::NotRegistered => "not_registered",
            Self::AlreadyMarked => "already_marked",
            Self::Storage(_) => "error",
        }
    }
}

/// Validates scans against the registry and records attendance
#[derive(Clone)]
pub struct AttendanceService {
    registry: Arc<dyn AttendeeRegistry>,
    ledger: Arc<dyn AttendanceLedger>,
    clock: Arc<dyn Clock>,
}

impl AttendanceService {
    /// Create a service over the given stores
    #[must_use]
    pub fn new(
        registry: Arc<dyn AttendeeRegistry>,
        ledger: Arc<dyn AttendanceLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ledger,
            clock,
        }
    }

    /// The attendee registry
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn AttendeeRegistry> {
        &self.registry
    }

    /// The attendance ledger
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn AttendanceLedger> {
        &self.ledger
    }

    /// Mark `attendee_id` present at `event`.
    ///
    /// # Errors
    ///
    /// - [`AttendanceError::NotRegistered`]: unknown attendee or not registered for `event`
    /// - [`AttendanceError::AlreadyMarked`]: attendance was recorded before
    /// - [`AttendanceError::Storage`]: a store failed
    #[tracing::instrument(skip_all, fields(attendee = %attendee_id, event = %event))]
    pub async fn mark_attendance(
        &self,
        attendee_id: &AttendeeId,
        event: &EventName,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let result = self.try_mark(attendee_id, event).await;

        let outcome = match &result {
            Ok(_) => "marked",
            Err(error) => error.outcome(),
        };
        metrics::counter!("attendance_marks_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(_) => tracing::info!("Attendance marked"),
            Err(AttendanceError::Storage(error)) => tracing::error!(%error, "Marking attendance failed"),
            Err(error) => tracing::info!(%error, "Attendance refused"),
        }

        result
    }

    async fn try_mark(
        &self,
        attendee_id: &AttendeeId,
        event: &EventName,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let attendee = self
            .registry
            .find_attendee(attendee_id)
            .await?
            .ok_or(AttendanceError::NotRegistered)?;

        if !attendee.is_registered_for(event) {
            return Err(AttendanceError::NotRegistered);
        }

        if self.ledger.find_record(attendee_id, event).await?.is_some() {
            return Err(AttendanceError::AlreadyMarked);
        }

        let record = AttendanceRecord {
            attendee_id: attendee_id.clone(),
            event_name: event.clone(),
            timestamp: self.clock.now(),
        };

        match self.ledger.record_if_absent(record.clone()).await? {
            InsertOutcome::Inserted => Ok(record),
            InsertOutcome::AlreadyPresent => Err(AttendanceError::AlreadyMarked),
        }
    }

    /// Attendance recorded for `event`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the ledger's [`StorageError`].
    #[tracing::instrument(skip_all, fields(event = %event))]
    pub async fn attendance_for_event(&self, event: &EventName) -> Result<Vec<AttendanceRecord>, StorageError> {
        let records = self.ledger.records_for_event(event).await?;
        tracing::debug!(count = records.len(), "Attendance listed");
        Ok(records)
    }

    /// Load [`sample_attendees`], skipping ids that already exist.
    ///
    /// Returns how many attendees were inserted.
    ///
    /// # Errors
    ///
    /// Returns the registry's [`StorageError`].
    #[tracing::instrument(skip(self))]
    pub async fn seed_sample_attendees(&self) -> Result<usize, StorageError> {
        let inserted = self.registry.insert_attendees(sample_attendees()).await?;
        tracing::info!(inserted, "Sample attendees loaded");
        Ok(inserted)
    }
}

impl std::fmt::Debug for AttendanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttendanceService").finish_non_exhaustive()
    }
}

/// The fixture attendees loaded by `POST /seed`
#[must_use]
pub fn sample_attendees() -> Vec<Attendee> {
    vec![
        Attendee::new("user1", "John Doe", ["Event A", "Event B"]),
        Attendee::new("user2", "Jane Smith", ["Event B", "Event C"]),
        Attendee::new("user3", "Alice Johnson", ["Event A", "Event C"]),
        Attendee::new("user4", "Bob Brown", ["Event B"]),
    ]
}

/// The default event catalog
#[must_use]
pub fn default_events() -> Vec<EventName> {
    ["Event A", "Event B", "Event C"]
        .into_iter()
        .map(EventName::new)
        .collect()
}
