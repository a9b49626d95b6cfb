//! Attendance domain types and storage traits.
//!
//! Two stores back the kiosk:
//!
//! - [`AttendeeRegistry`]: who is registered for which events
//! - [`AttendanceLedger`]: who has been marked present, at most once per event
//!
//! # Implementations
//!
//! - `PostgresAttendeeRegistry` / `PostgresAttendanceLedger` (in `kiosk-postgres`)
//! - `InMemoryAttendeeRegistry` / `InMemoryAttendanceLedger` (in `kiosk-testing`)
//!
//! # Uniqueness
//!
//! The ledger guarantees at most one record per (attendee, event) pair itself:
//! [`AttendanceLedger::record_if_absent`] is an atomic conditional insert, so two
//! concurrent scans of the same code cannot both write a record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Identifier printed in an attendee's QR code
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendeeId(String);

impl AttendeeId {
    /// Create an attendee id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttendeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an event attendees register for (e.g. "Event A")
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventName(String);

impl EventName {
    /// Create an event name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The raw name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A person eligible to attend one or more events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Unique id (the QR payload)
    pub id: AttendeeId,
    /// Display name
    pub name: String,
    /// Events this attendee is registered for
    #[serde(rename = "registeredEvent")]
    pub registered_events: BTreeSet<EventName>,
}

impl Attendee {
    /// Create an attendee registered for `events`
    ///
    /// Blank event names are dropped.
    #[must_use]
    pub fn new<I, E>(id: impl Into<String>, name: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        Self {
            id: AttendeeId::new(id),
            name: name.into(),
            registered_events: events
                .into_iter()
                .map(Into::into)
                .filter(|e: &String| !e.trim().is_empty())
                .map(EventName::new)
                .collect(),
        }
    }

    /// Whether the attendee is registered for `event`
    #[must_use]
    pub fn is_registered_for(&self, event: &EventName) -> bool {
        self.registered_events.contains(event)
    }
}

/// Proof that an attendee was marked present at an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Who attended
    #[serde(rename = "userId")]
    pub attendee_id: AttendeeId,
    /// Which event
    #[serde(rename = "registeredEvent")]
    pub event_name: EventName,
    /// When the attendance was recorded
    pub timestamp: DateTime<Utc>,
}

/// Result of a conditional insert
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written
    Inserted,
    /// A record for the same (attendee, event) already existed; nothing was written
    AlreadyPresent,
}

/// Errors raised by the storage backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Query or connection failure
    #[error("Database error: {0}")]
    Database(String),

    /// Backend not reachable (pool closed, server down)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by the storage traits
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Registry of attendees and the events they registered for.
///
/// Attendees are provisioned outside the kiosk; the kiosk only reads them.
/// `insert_attendees` exists for the fixture loader.
pub trait AttendeeRegistry: Send + Sync {
    /// Look up an attendee by id. Unknown ids yield `Ok(None)`.
    fn find_attendee<'a>(&'a self, id: &'a AttendeeId) -> StorageFuture<'a, Option<Attendee>>;

    /// Insert attendees whose id is not yet known; returns how many were inserted.
    fn insert_attendees(&self, attendees: Vec<Attendee>) -> StorageFuture<'_, usize>;

    /// Cheap connectivity check for readiness probes.
    fn ping(&self) -> StorageFuture<'_, ()>;
}

/// Append-only ledger of attendance records.
pub trait AttendanceLedger: Send + Sync {
    /// Find the record for (attendee, event), if any.
    fn find_record<'a>(
        &'a self,
        attendee: &'a AttendeeId,
        event: &'a EventName,
    ) -> StorageFuture<'a, Option<AttendanceRecord>>;

    /// Write `record` unless one already exists for its (attendee, event) pair.
    ///
    /// The existence check and the write are a single atomic step.
    fn record_if_absent(&self, record: AttendanceRecord) -> StorageFuture<'_, InsertOutcome>;

    /// All records for `event`, oldest first.
    fn records_for_event<'a>(&'a self, event: &'a EventName)
    -> StorageFuture<'a, Vec<AttendanceRecord>>;

    /// Cheap connectivity check for readiness probes.
    fn ping(&self) -> StorageFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendee_wire_format() {
        let attendee = Attendee::new("user1", "John Doe", ["Event A", "Event B"]);
        let json = serde_json::to_value(&attendee).unwrap_or_default();

        assert_eq!(json["id"], "user1");
        assert_eq!(json["name"], "John Doe");
        assert_eq!(json["registeredEvent"], serde_json::json!(["Event A", "Event B"]));
    }

    #[test]
    fn test_blank_event_names_are_dropped() {
        let attendee = Attendee::new("user9", "Blank", ["", "  ", "Event C"]);
        assert_eq!(attendee.registered_events.len(), 1);
        assert!(attendee.is_registered_for(&EventName::new("Event C")));
    }

    #[test]
    fn test_registration_is_exact_match() {
        let attendee = Attendee::new("user4", "Bob Brown", ["Event B"]);
        assert!(attendee.is_registered_for(&EventName::new("Event B")));
        assert!(!attendee.is_registered_for(&EventName::new("event b")));
        assert!(!attendee.is_registered_for(&EventName::new("Event A")));
    }

    #[test]
    fn test_record_wire_format() {
        let record = AttendanceRecord {
            attendee_id: AttendeeId::new("user1"),
            event_name: EventName::new("Event A"),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&record).unwrap_or_default();

        assert_eq!(json["userId"], "user1");
        assert_eq!(json["registeredEvent"], "Event A");
        assert!(json["timestamp"].is_string());
    }
}
