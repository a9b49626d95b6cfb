//! Attendance endpoints.
//!
//! - `POST /mark-attendance` - validate a scan and record attendance
//! - `POST /seed` - load the sample attendees
//! - `GET /events` - the event catalog offered to the kiosk
//! - `GET /events/:event/attendance` - attendance recorded for one event

use super::AppState;
use crate::validation::{
    AttendanceError, LIST_FAILED_MESSAGE, MARKED_MESSAGE, SEED_FAILED_MESSAGE, SEEDED_MESSAGE,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use kiosk_core::attendance::{AttendanceRecord, AttendeeId, EventName};
use kiosk_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to mark attendance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAttendanceRequest {
    /// Scanned attendee id
    pub user_id: String,
    /// Event selected on the kiosk
    pub event_name: String,
}

/// Plain `{ "message": ... }` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Human-readable outcome
    pub message: String,
}

/// Response after seeding.
#[derive(Debug, Serialize, Deserialize)]
pub struct SeedResponse {
    /// Human-readable outcome
    pub message: String,
    /// Attendees that were not present before
    pub inserted: usize,
}

/// Event catalog.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
    /// Selectable events
    pub events: Vec<EventName>,
}

/// Attendance of one event.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventAttendanceResponse {
    /// The event
    pub event: EventName,
    /// Records, oldest first
    pub records: Vec<AttendanceRecord>,
}

impl From<AttendanceError> for AppError {
    fn from(error: AttendanceError) -> Self {
        let message = error.to_string();
        match error {
            AttendanceError::NotRegistered => Self::new(StatusCode::BAD_REQUEST, message, "NOT_REGISTERED"),
            AttendanceError::AlreadyMarked => Self::new(StatusCode::BAD_REQUEST, message, "ALREADY_MARKED"),
            AttendanceError::Storage(source) => Self::internal(message).with_source(source),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Mark attendance.
///
/// ```text
/// POST /mark-attendance {"userId": "user1", "eventName": "Event A"}
///   200 {"message": "Attendance marked successfully"}
///   400 {"message": "User not registered for this event"}
///   400 {"message": "Attendance already marked for this user"}
///   500 {"message": "Error marking attendance"}
/// ```
///
/// # Errors
///
/// Malformed bodies and refused scans are 400s, store failures 500s.
pub async fn mark_attendance(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    payload: Result<Json<MarkAttendanceRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, AppError> {
    let Json(request) = payload?;

    tracing::debug!(
        correlation_id = %correlation_id,
        user_id = %request.user_id,
        event = %request.event_name,
        "Mark attendance requested"
    );

    state
        .service
        .mark_attendance(
            &AttendeeId::new(request.user_id),
            &EventName::new(request.event_name),
        )
        .await?;

    Ok(Json(MessageResponse {
        message: MARKED_MESSAGE.to_string(),
    }))
}

/// Load the sample attendees.
///
/// ```text
/// POST /seed
///   200 {"message": "Users added successfully", "inserted": 4}
///   500 {"message": "Error adding users"}
/// ```
///
/// # Errors
///
/// 500 when the registry fails.
pub async fn seed(State(state): State<AppState>) -> Result<Json<SeedResponse>, AppError> {
    let inserted = state
        .service
        .seed_sample_attendees()
        .await
        .map_err(|error| AppError::internal(SEED_FAILED_MESSAGE).with_source(error))?;

    Ok(Json(SeedResponse {
        message: SEEDED_MESSAGE.to_string(),
        inserted,
    }))
}

/// The event catalog.
///
/// ```text
/// GET /events → 200 {"events": ["Event A", "Event B", "Event C"]}
/// ```
pub async fn list_events(State(state): State<AppState>) -> Json<EventsResponse> {
    Json(EventsResponse {
        events: state.events.to_vec(),
    })
}

/// Attendance recorded for one event.
///
/// ```text
/// GET /events/Event%20A/attendance
///   200 {"event": "Event A", "records": [{"userId": "user1", "registeredEvent": "Event A", "timestamp": "..."}]}
///   404 event not in the catalog
///   500 {"message": "Error loading attendance"}
/// ```
///
/// # Errors
///
/// 404 for events outside the catalog, 500 when the ledger fails.
pub async fn event_attendance(
    State(state): State<AppState>,
    Path(event): Path<String>,
) -> Result<Json<EventAttendanceResponse>, AppError> {
    let event = EventName::new(event);
    if !state.events.contains(&event) {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            format!("Unknown event: {event}"),
            "UNKNOWN_EVENT",
        ));
    }

    let records = state
        .service
        .attendance_for_event(&event)
        .await
        .map_err(|error| AppError::internal(LIST_FAILED_MESSAGE).with_source(error))?;

    Ok(Json(EventAttendanceResponse { event, records }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::attendance::StorageError;
    use std::error::Error as _;

    #[test]
    fn test_refusals_are_bad_requests() {
        let error = AppError::from(AttendanceError::AlreadyMarked);

        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.code(), "ALREADY_MARKED");
        assert_eq!(error.message(), "Attendance already marked for this user");
    }

    #[test]
    fn test_storage_failure_keeps_message_and_source() {
        let error = AppError::from(AttendanceError::Storage(StorageError::Unavailable("pool closed".into())));

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "INTERNAL_SERVER_ERROR");
        assert_eq!(error.message(), "Error marking attendance");
        assert_eq!(
            error.source().map(ToString::to_string),
            Some("Storage unavailable: pool closed".to_string())
        );
    }
}
