//! In-memory attendee registry and attendance ledger.
//!
//! Both stores are cheap to clone; clones share the same data. A failure can be
//! injected with `fail_with` to exercise storage error paths.

use kiosk_core::attendance::{
    AttendanceLedger, AttendanceRecord, Attendee, AttendeeId, AttendeeRegistry, EventName,
    InsertOutcome, StorageError, StorageFuture,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct FailureSwitch(Mutex<Option<StorageError>>);

impl FailureSwitch {
    fn set(&self, error: Option<StorageError>) {
        *guard(&self.0) = error;
    }

    fn check(&self) -> Result<(), StorageError> {
        guard(&self.0).clone().map_or(Ok(()), Err)
    }
}

/// In-memory attendee registry keyed by attendee id
#[derive(Clone, Debug, Default)]
pub struct InMemoryAttendeeRegistry {
    attendees: Arc<RwLock<HashMap<AttendeeId, Attendee>>>,
    failure: Arc<FailureSwitch>,
}

impl InMemoryAttendeeRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `attendees`
    #[must_use]
    pub fn with_attendees(attendees: impl IntoIterator<Item = Attendee>) -> Self {
        let registry = Self::new();
        {
            let mut map = write(&registry.attendees);
            for attendee in attendees {
                map.entry(attendee.id.clone()).or_insert(attendee);
            }
        }
        registry
    }

    /// Make every operation fail with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<StorageError>) {
        self.failure.set(error);
    }

    /// Number of attendees
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.attendees).len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.attendees).is_empty()
    }
}

impl AttendeeRegistry for InMemoryAttendeeRegistry {
    fn find_attendee<'a>(&'a self, id: &'a AttendeeId) -> StorageFuture<'a, Option<Attendee>> {
        Box::pin(async move {
            self.failure.check()?;
            Ok(read(&self.attendees).get(id).cloned())
        })
    }

    fn insert_attendees(&self, attendees: Vec<Attendee>) -> StorageFuture<'_, usize> {
        Box::pin(async move {
            self.failure.check()?;
            let mut map = write(&self.attendees);
            let mut inserted = 0;
            for attendee in attendees {
                if !map.contains_key(&attendee.id) {
                    map.insert(attendee.id.clone(), attendee);
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
    }

    fn ping(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.failure.check() })
    }
}

/// In-memory attendance ledger
///
/// The existence check and the insert in `record_if_absent` happen under one
/// write lock.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAttendanceLedger {
    records: Arc<RwLock<Vec<AttendanceRecord>>>,
    failure: Arc<FailureSwitch>,
}

impl InMemoryAttendanceLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `error` until cleared with `None`
    pub fn fail_with(&self, error: Option<StorageError>) {
        self.failure.set(error);
    }

    /// Snapshot of every record, in insertion order
    #[must_use]
    pub fn records(&self) -> Vec<AttendanceRecord> {
        read(&self.records).clone()
    }

    /// Number of records
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    /// Whether the ledger is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.records).is_empty()
    }
}

impl AttendanceLedger for InMemoryAttendanceLedger {
    fn find_record<'a>(
        &'a self,
        attendee: &'a AttendeeId,
        event: &'a EventName,
    ) -> StorageFuture<'a, Option<AttendanceRecord>> {
        Box::pin(async move {
            self.failure.check()?;
            Ok(read(&self.records)
                .iter()
                .find(|r| &r.attendee_id == attendee && &r.event_name == event)
                .cloned())
        })
    }

    fn record_if_absent(&self, record: AttendanceRecord) -> StorageFuture<'_, InsertOutcome> {
        Box::pin(async move {
            self.failure.check()?;
            let mut records = write(&self.records);
            let exists = records
                .iter()
                .any(|r| r.attendee_id == record.attendee_id && r.event_name == record.event_name);

            if exists {
                Ok(InsertOutcome::AlreadyPresent)
            } else {
                records.push(record);
                Ok(InsertOutcome::Inserted)
            }
        })
    }

    fn records_for_event<'a>(&'a self, event: &'a EventName) -> StorageFuture<'a, Vec<AttendanceRecord>> {
        Box::pin(async move {
            self.failure.check()?;
            let mut records: Vec<AttendanceRecord> = read(&self.records)
                .iter()
                .filter(|r| &r.event_name == event)
                .cloned()
                .collect();
            records.sort_by_key(|r| r.timestamp);
            Ok(records)
        })
    }

    fn ping(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move { self.failure.check() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch_2025;

    fn record(user: &str, event: &str) -> AttendanceRecord {
        AttendanceRecord {
            attendee_id: AttendeeId::new(user),
            event_name: EventName::new(event),
            timestamp: epoch_2025(),
        }
    }

    #[tokio::test]
    async fn test_insert_skips_existing_ids() -> Result<(), StorageError> {
        let registry = InMemoryAttendeeRegistry::with_attendees([Attendee::new("user1", "John Doe", ["Event A"])]);

        let inserted = registry
            .insert_attendees(vec![
                Attendee::new("user1", "Someone Else", ["Event C"]),
                Attendee::new("user2", "Jane Smith", ["Event B"]),
            ])
            .await?;

        assert_eq!(inserted, 1);
        assert_eq!(registry.len(), 2);
        let user1 = registry.find_attendee(&AttendeeId::new("user1")).await?;
        assert_eq!(user1.map(|a| a.name), Some("John Doe".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_record_if_absent_is_conditional() -> Result<(), StorageError> {
        let ledger = InMemoryAttendanceLedger::new();

        assert_eq!(ledger.record_if_absent(record("user1", "Event A")).await?, InsertOutcome::Inserted);
        assert_eq!(ledger.record_if_absent(record("user1", "Event A")).await?, InsertOutcome::AlreadyPresent);
        assert_eq!(ledger.record_if_absent(record("user1", "Event B")).await?, InsertOutcome::Inserted);

        assert_eq!(ledger.len(), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_write_one_record() -> Result<(), StorageError> {
        let ledger = InMemoryAttendanceLedger::new();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.record_if_absent(record("user2", "Event B")).await })
            })
            .collect();

        let mut inserted = 0;
        for task in tasks {
            if let Ok(Ok(InsertOutcome::Inserted)) = task.await {
                inserted += 1;
            }
        }

        assert_eq!(inserted, 1);
        assert_eq!(ledger.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let ledger = InMemoryAttendanceLedger::new();
        ledger.fail_with(Some(StorageError::Unavailable("down".into())));

        let result = ledger.ping().await;
        assert_eq!(result, Err(StorageError::Unavailable("down".into())));

        ledger.fail_with(None);
        assert!(ledger.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_records_for_event_filters() -> Result<(), StorageError> {
        let ledger = InMemoryAttendanceLedger::new();
        ledger.record_if_absent(record("user1", "Event A")).await?;
        ledger.record_if_absent(record("user3", "Event A")).await?;
        ledger.record_if_absent(record("user2", "Event B")).await?;

        let records = ledger.records_for_event(&EventName::new("Event A")).await?;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.event_name.as_str() == "Event A"));
        Ok(())
    }
}
