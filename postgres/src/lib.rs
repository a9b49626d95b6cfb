//! `PostgreSQL` storage for the attendance kiosk.
//!
//! This crate implements the attendee registry and the attendance ledger from
//! `kiosk-core` on top of sqlx:
//!
//! - [`PostgresAttendeeRegistry`]: `attendees` table, registered events as `TEXT[]`
//! - [`PostgresAttendanceLedger`]: `attendance_records` table with a
//!   `UNIQUE (user_id, registered_event)` constraint
//!
//! The ledger writes with `INSERT .. ON CONFLICT DO NOTHING`, so the uniqueness
//! of attendance records holds even when two kiosks scan the same code at once.
//!
//! # Example
//!
//! ```ignore
//! use kiosk_postgres::{connect, migrate, PostgresAttendanceLedger, PostgresAttendeeRegistry};
//!
//! let pool = connect("postgres://localhost/attendance", 10, Duration::from_secs(5)).await?;
//! migrate(&pool).await?;
//!
//! let registry = PostgresAttendeeRegistry::new(pool.clone());
//! let ledger = PostgresAttendanceLedger::new(pool);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use kiosk_core::attendance::{
    AttendanceLedger, AttendanceRecord, Attendee, AttendeeId, AttendeeRegistry, EventName,
    InsertOutcome, StorageError, StorageFuture,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Connect a pool to `database_url`.
///
/// # Errors
///
/// Returns [`StorageError::Unavailable`] if no connection can be established.
pub async fn connect(
    database_url: &str,
    max_connections: u32,
    connect_timeout: Duration,
) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Failed to connect: {e}")))
}

/// Run the embedded migrations.
///
/// # Errors
///
/// Returns [`StorageError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::Database(format!("Migration failed: {e}")))
}

fn storage_error(operation: &'static str, error: sqlx::Error) -> StorageError {
    metrics::counter!("postgres.errors.total", "operation" => operation).increment(1);
    tracing::warn!(operation, error = %error, "Postgres operation failed");

    match error {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StorageError::Unavailable(error.to_string())
        },
        other => StorageError::Database(other.to_string()),
    }
}

type AttendeeRow = (String, String, Vec<String>);
type RecordRow = (String, String, DateTime<Utc>);

fn record_from_row((user_id, event, timestamp): RecordRow) -> AttendanceRecord {
    AttendanceRecord {
        attendee_id: AttendeeId::new(user_id),
        event_name: EventName::new(event),
        timestamp,
    }
}

/// Attendee registry backed by the `attendees` table
#[derive(Clone, Debug)]
pub struct PostgresAttendeeRegistry {
    pool: PgPool,
}

impl PostgresAttendeeRegistry {
    /// Create a registry on an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl AttendeeRegistry for PostgresAttendeeRegistry {
    fn find_attendee<'a>(&'a self, id: &'a AttendeeId) -> StorageFuture<'a, Option<Attendee>> {
        Box::pin(async move {
            let row: Option<AttendeeRow> =
                sqlx::query_as("SELECT id, name, registered_event FROM attendees WHERE id = $1")
                    .bind(id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| storage_error("find_attendee", e))?;

            Ok(row.map(|(id, name, events)| Attendee::new(id, name, events)))
        })
    }

    fn insert_attendees(&self, attendees: Vec<Attendee>) -> StorageFuture<'_, usize> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| storage_error("insert_attendees", e))?;

            let mut inserted = 0_u64;
            for attendee in attendees {
                let events: Vec<String> = attendee
                    .registered_events
                    .iter()
                    .map(|e| e.as_str().to_string())
                    .collect();

                let result = sqlx::query(
                    "INSERT INTO attendees (id, name, registered_event)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(attendee.id.as_str())
                .bind(&attendee.name)
                .bind(&events)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage_error("insert_attendees", e))?;

                inserted += result.rows_affected();
            }

            tx.commit()
                .await
                .map_err(|e| storage_error("insert_attendees", e))?;

            tracing::info!(inserted, "Attendees inserted");
            Ok(usize::try_from(inserted).unwrap_or(usize::MAX))
        })
    }

    fn ping(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| storage_error("ping", e))
        })
    }
}

/// Attendance ledger backed by the `attendance_records` table
#[derive(Clone, Debug)]
pub struct PostgresAttendanceLedger {
    pool: PgPool,
}

impl PostgresAttendanceLedger {
    /// Create a ledger on an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AttendanceLedger for PostgresAttendanceLedger {
    fn find_record<'a>(
        &'a self,
        attendee: &'a AttendeeId,
        event: &'a EventName,
    ) -> StorageFuture<'a, Option<AttendanceRecord>> {
        Box::pin(async move {
            let row: Option<RecordRow> = sqlx::query_as(
                "SELECT user_id, registered_event, timestamp
                 FROM attendance_records
                 WHERE user_id = $1 AND registered_event = $2",
            )
            .bind(attendee.as_str())
            .bind(event.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error("find_record", e))?;

            Ok(row.map(record_from_row))
        })
    }

    fn record_if_absent(&self, record: AttendanceRecord) -> StorageFuture<'_, InsertOutcome> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO attendance_records (user_id, registered_event, timestamp)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (user_id, registered_event) DO NOTHING",
            )
            .bind(record.attendee_id.as_str())
            .bind(record.event_name.as_str())
            .bind(record.timestamp)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("record_if_absent", e))?;

            if result.rows_affected() == 0 {
                Ok(InsertOutcome::AlreadyPresent)
            } else {
                Ok(InsertOutcome::Inserted)
            }
        })
    }

    fn records_for_event<'a>(&'a self, event: &'a EventName) -> StorageFuture<'a, Vec<AttendanceRecord>> {
        Box::pin(async move {
            let rows: Vec<RecordRow> = sqlx::query_as(
                "SELECT user_id, registered_event, timestamp
                 FROM attendance_records
                 WHERE registered_event = $1
                 ORDER BY timestamp, id",
            )
            .bind(event.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error("records_for_event", e))?;

            Ok(rows.into_iter().map(record_from_row).collect())
        })
    }

    fn ping(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|e| storage_error("ping", e))
        })
    }
}
