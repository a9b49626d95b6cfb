//! Operator session.
//!
//! Mirrors the kiosk page: pick an event, toggle the scanner, read the
//! banner. Every candidate from the scan controller triggers a
//! fire-and-forget attendance call; scanning continues while calls are in
//! flight and each outcome replaces the banner when it arrives.

use crate::api::{MarkAttendanceRequest, MessageResponse};
use crate::scanner::{ScanController, ScanEvent, ScanEvents};
use crate::validation::{AttendanceError, AttendanceService, MARKED_MESSAGE};
use kiosk_core::attendance::{AttendeeId, EventName};
use kiosk_core::camera::CameraError;
use kiosk_runtime::StoreError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Message shown when the server cannot be reached
pub const TRANSPORT_FAILED_MESSAGE: &str = "Error marking attendance";

/// Why an attendance call did not succeed
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server refused the scan
    #[error("{message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Server message
        message: String,
    },

    /// The request never got an answer
    #[error("Error marking attendance")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Text for the banner
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Boxed future returned by [`AttendanceClient`]
pub type ClientFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ClientError>> + Send + 'a>>;

/// Something that can mark attendance
///
/// `Ok` carries the success message.
pub trait AttendanceClient: Send + Sync {
    /// Mark `attendee` present at `event`
    fn mark_attendance(&self, attendee: AttendeeId, event: EventName) -> ClientFuture<'_>;
}

/// Calls `POST {server}/mark-attendance`
///
/// No timeout is applied to the call.
#[derive(Debug, Clone)]
pub struct HttpAttendanceClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpAttendanceClient {
    /// Client for the server at `base_url` (e.g. `http://127.0.0.1:8080`)
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/mark-attendance", base_url.trim_end_matches('/')),
        }
    }
}

impl AttendanceClient for HttpAttendanceClient {
    fn mark_attendance(&self, attendee: AttendeeId, event: EventName) -> ClientFuture<'_> {
        Box::pin(async move {
            let request = MarkAttendanceRequest {
                user_id: attendee.as_str().to_string(),
                event_name: event.as_str().to_string(),
            };

            let response = self.http.post(&self.endpoint).json(&request).send().await?;
            let status = response.status();
            let message = response
                .json::<MessageResponse>()
                .await
                .map(|body| body.message)
                .ok();

            if status.is_success() {
                Ok(message.unwrap_or_else(|| MARKED_MESSAGE.to_string()))
            } else {
                tracing::debug!(status = status.as_u16(), "Attendance rejected by server");
                Err(ClientError::Rejected {
                    status: status.as_u16(),
                    message: message.unwrap_or_else(|| TRANSPORT_FAILED_MESSAGE.to_string()),
                })
            }
        })
    }
}

/// Calls the validation service in-process (standalone kiosk)
#[derive(Debug, Clone)]
pub struct LocalAttendanceClient {
    service: AttendanceService,
}

impl LocalAttendanceClient {
    /// Client over `service`
    #[must_use]
    pub const fn new(service: AttendanceService) -> Self {
        Self { service }
    }
}

impl AttendanceClient for LocalAttendanceClient {
    fn mark_attendance(&self, attendee: AttendeeId, event: EventName) -> ClientFuture<'_> {
        Box::pin(async move {
            match self.service.mark_attendance(&attendee, &event).await {
                Ok(_) => Ok(MARKED_MESSAGE.to_string()),
                Err(error) => {
                    let status = match error {
                        AttendanceError::Storage(_) => 500,
                        _ => 400,
                    };
                    Err(ClientError::Rejected {
                        status,
                        message: error.to_string(),
                    })
                },
            }
        })
    }
}

/// Banner colour
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    /// Attendance recorded
    Success,
    /// Anything else
    Error,
}

/// Dismissible banner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    /// Colour
    pub kind: AlertKind,
    /// Text
    pub message: String,
}

impl Alert {
    fn success(message: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Success,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Error,
            message: message.into(),
        }
    }
}

const CAMERA_ACCESS_FAILED: &str = "Could not access the camera.";

/// Operator-facing text for a camera failure
///
/// Device failures carry the platform's reason when it gave one.
#[must_use]
pub fn camera_error_message(error: &CameraError) -> String {
    match error {
        CameraError::Unavailable(_) => "Camera access is not supported on this device.".to_string(),
        CameraError::NoDevices => "No camera found on your device.".to_string(),
        CameraError::DeviceStart { reason, .. } | CameraError::StreamFailed { reason, .. }
            if !reason.trim().is_empty() =>
        {
            format!("Could not access the camera: {}", reason.trim())
        },
        CameraError::DeviceStart { .. }
        | CameraError::StreamFailed { .. }
        | CameraError::StreamEnded { .. } => CAMERA_ACCESS_FAILED.to_string(),
    }
}

/// Operator mistakes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KioskError {
    /// The scanner needs an event
    #[error("Select an event before scanning")]
    NoEventSelected,

    /// Event not in the catalog
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The scan controller was torn down
    #[error(transparent)]
    Scanner(#[from] StoreError),
}

/// Something the operator should see
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KioskUpdate {
    /// A code was scanned and is being validated
    Scanned(AttendeeId),
    /// The banner changed
    Alert(Alert),
    /// The camera opened or closed
    Scanning(bool),
}

#[derive(Debug)]
struct ScanOutcome {
    attendee: AttendeeId,
    result: Result<String, ClientError>,
}

/// One kiosk
pub struct KioskSession {
    scanner: ScanController,
    scan_events: ScanEvents,
    client: Arc<dyn AttendanceClient>,
    events: Vec<EventName>,
    selected_event: Option<EventName>,
    scanning: bool,
    alert: Option<Alert>,
    last_scanned: Option<AttendeeId>,
    outcomes_tx: mpsc::UnboundedSender<ScanOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ScanOutcome>,
}

impl KioskSession {
    /// Session over `scanner`, offering `events`
    #[must_use]
    pub fn new(
        scanner: ScanController,
        client: Arc<dyn AttendanceClient>,
        events: Vec<EventName>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            scan_events: scanner.subscribe(),
            scanner,
            client,
            events,
            selected_event: None,
            scanning: false,
            alert: None,
            last_scanned: None,
            outcomes_tx,
            outcomes_rx,
        }
    }

    /// Selectable events
    #[must_use]
    pub fn events(&self) -> &[EventName] {
        &self.events
    }

    /// Event scans are validated against
    #[must_use]
    pub const fn selected_event(&self) -> Option<&EventName> {
        self.selected_event.as_ref()
    }

    /// Whether the scanner was switched on
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Current banner
    #[must_use]
    pub const fn alert(&self) -> Option<&Alert> {
        self.alert.as_ref()
    }

    /// Last scanned attendee id
    #[must_use]
    pub const fn last_scanned(&self) -> Option<&AttendeeId> {
        self.last_scanned.as_ref()
    }

    /// The scan controller
    #[must_use]
    pub const fn scanner(&self) -> &ScanController {
        &self.scanner
    }

    /// Choose the event to validate against.
    ///
    /// # Errors
    ///
    /// [`KioskError::UnknownEvent`] if `name` is not in the catalog.
    pub fn select_event(&mut self, name: &str) -> Result<(), KioskError> {
        let event = self
            .events
            .iter()
            .find(|e| e.as_str() == name)
            .cloned()
            .ok_or_else(|| KioskError::UnknownEvent(name.to_string()))?;

        tracing::info!(event = %event, "Event selected");
        self.selected_event = Some(event);
        Ok(())
    }

    /// Clear the event; the scanner stops with it.
    ///
    /// # Errors
    ///
    /// [`KioskError::Scanner`] if the controller was torn down.
    pub async fn clear_event(&mut self) -> Result<(), KioskError> {
        self.selected_event = None;
        if self.scanning {
            self.scanning = false;
            self.scanner.stop().await?;
        }
        Ok(())
    }

    /// Switch the scanner on or off; returns whether it is now on.
    ///
    /// # Errors
    ///
    /// - [`KioskError::NoEventSelected`] when switching on without an event
    /// - [`KioskError::Scanner`] if the controller was torn down
    pub async fn toggle_scanner(&mut self) -> Result<bool, KioskError> {
        if self.scanning {
            self.scanning = false;
            self.scanner.stop().await?;
        } else {
            if self.selected_event.is_none() {
                return Err(KioskError::NoEventSelected);
            }
            self.scanning = true;
            self.scanner.start().await?;
        }
        Ok(self.scanning)
    }

    /// Hide the banner (and the controller's camera error)
    ///
    /// # Errors
    ///
    /// [`KioskError::Scanner`] if the controller was torn down.
    pub async fn dismiss_alert(&mut self) -> Result<(), KioskError> {
        self.alert = None;
        self.scanner.dismiss_error().await?;
        Ok(())
    }

    /// Wait for the next thing the operator should see.
    ///
    /// `None` once the scan controller is gone.
    pub async fn next_update(&mut self) -> Option<KioskUpdate> {
        loop {
            tokio::select! {
                event = self.scan_events.next() => {
                    let event = event?;
                    if let Some(update) = self.on_scan_event(event) {
                        return Some(update);
                    }
                },
                Some(outcome) = self.outcomes_rx.recv() => {
                    return Some(self.on_outcome(outcome));
                },
            }
        }
    }

    fn on_scan_event(&mut self, event: ScanEvent) -> Option<KioskUpdate> {
        match event {
            ScanEvent::Candidate(text) => {
                let attendee = AttendeeId::new(text);
                self.last_scanned = Some(attendee.clone());

                let Some(event) = self.selected_event.clone() else {
                    tracing::debug!(attendee = %attendee, "Scan ignored: no event selected");
                    return None;
                };

                let client = Arc::clone(&self.client);
                let outcomes = self.outcomes_tx.clone();
                let scanned = attendee.clone();
                tokio::spawn(async move {
                    let result = client.mark_attendance(scanned.clone(), event).await;
                    let _ = outcomes.send(ScanOutcome {
                        attendee: scanned,
                        result,
                    });
                });

                Some(KioskUpdate::Scanned(attendee))
            },
            ScanEvent::CameraError(error) => {
                self.scanning = false;
                let alert = Alert::error(camera_error_message(&error));
                self.alert = Some(alert.clone());
                Some(KioskUpdate::Alert(alert))
            },
            ScanEvent::Started(_) => Some(KioskUpdate::Scanning(true)),
            ScanEvent::Released if !self.scanning => Some(KioskUpdate::Scanning(false)),
            ScanEvent::Released => None,
        }
    }

    fn on_outcome(&mut self, outcome: ScanOutcome) -> KioskUpdate {
        let alert = match outcome.result {
            Ok(message) => Alert::success(message),
            Err(error) => {
                tracing::info!(attendee = %outcome.attendee, %error, "Attendance not marked");
                Alert::error(error.message())
            },
        };
        self.alert = Some(alert.clone());
        KioskUpdate::Alert(alert)
    }

    /// Release the camera and stop the controller.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownTimeout`] if effects are still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
        self.scanner.teardown(timeout).await
    }
}

impl std::fmt::Debug for KioskSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KioskSession")
            .field("selected_event", &self.selected_event)
            .field("scanning", &self.scanning)
            .field("alert", &self.alert)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code
mod tests {
    use super::*;
    use crate::scanner::ScanConfig;
    use crate::validation::sample_attendees;
    use kiosk_core::camera::{CameraDevice, DeviceId};
    use kiosk_testing::{
        InMemoryAttendanceLedger, InMemoryAttendeeRegistry, ScriptedCamera, ScriptedFrame, test_clock,
    };

    fn session(camera: ScriptedCamera) -> (KioskSession, InMemoryAttendanceLedger) {
        let ledger = InMemoryAttendanceLedger::new();
        let service = AttendanceService::new(
            Arc::new(InMemoryAttendeeRegistry::with_attendees(sample_attendees())),
            Arc::new(ledger.clone()),
            Arc::new(test_clock()),
        );
        let scanner = ScanController::new(Arc::new(camera), Arc::new(test_clock()), ScanConfig::default());
        let session = KioskSession::new(
            scanner,
            Arc::new(LocalAttendanceClient::new(service)),
            crate::validation::default_events(),
        );
        (session, ledger)
    }

    async fn next_alert(session: &mut KioskSession) -> Alert {
        loop {
            match session.next_update().await.expect("controller alive") {
                KioskUpdate::Alert(alert) => return alert,
                _ => {},
            }
        }
    }

    #[tokio::test]
    async fn test_scanner_requires_an_event() {
        let (mut session, _) = session(ScriptedCamera::new(vec![CameraDevice::new("cam", "Back")]));

        assert_eq!(session.toggle_scanner().await, Err(KioskError::NoEventSelected));
        assert!(session.select_event("Event Z").is_err());
        assert!(session.select_event("Event A").is_ok());
        assert_eq!(session.toggle_scanner().await, Ok(true));
        assert_eq!(session.toggle_scanner().await, Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_marks_attendance_and_shows_banner() {
        let camera = ScriptedCamera::new(vec![CameraDevice::new("cam", "Back")])
            .with_frames("cam", ScriptedFrame::held("user1", Duration::from_millis(100), 3));
        let (mut session, ledger) = session(camera);

        session.select_event("Event A").unwrap();
        session.toggle_scanner().await.unwrap();

        let alert = next_alert(&mut session).await;
        assert_eq!(alert, Alert::success(MARKED_MESSAGE));
        assert_eq!(session.last_scanned(), Some(&AttendeeId::new("user1")));
        assert_eq!(ledger.len(), 1);

        session.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_scan_shows_error() {
        let camera = ScriptedCamera::new(vec![CameraDevice::new("cam", "Back")])
            .with_frames("cam", [ScriptedFrame::text(Duration::from_millis(100), "user4")]);
        let (mut session, ledger) = session(camera);

        session.select_event("Event A").unwrap();
        session.toggle_scanner().await.unwrap();

        let alert = next_alert(&mut session).await;
        assert_eq!(alert.kind, AlertKind::Error);
        assert_eq!(alert.message, "User not registered for this event");
        assert!(ledger.is_empty());

        session.dismiss_alert().await.unwrap();
        assert!(session.alert().is_none());
    }

    #[tokio::test]
    async fn test_camera_error_reaches_the_banner() {
        let camera = ScriptedCamera::new(Vec::new());
        let (mut session, _) = session(camera);

        session.select_event("Event B").unwrap();
        session.toggle_scanner().await.unwrap();

        let alert = next_alert(&mut session).await;
        assert_eq!(alert, Alert::error("No camera found on your device."));
        assert!(!session.is_scanning());
    }

    #[tokio::test]
    async fn test_camera_failure_reason_reaches_the_banner() {
        let camera = ScriptedCamera::new(vec![CameraDevice::new("back", "Back Camera")])
            .failing_open("back", "device in use");
        let (mut session, _) = session(camera);

        session.select_event("Event B").unwrap();
        session.toggle_scanner().await.unwrap();

        let alert = next_alert(&mut session).await;
        assert_eq!(alert, Alert::error("Could not access the camera: device in use"));
        assert!(!session.is_scanning());
    }

    #[test]
    fn test_camera_message_keeps_device_reason() {
        let busy = CameraError::DeviceStart {
            device: DeviceId::new("back"),
            reason: "device in use".into(),
        };
        let silent = CameraError::StreamFailed {
            device: DeviceId::new("back"),
            reason: "  ".into(),
        };

        assert_eq!(camera_error_message(&busy), "Could not access the camera: device in use");
        assert_eq!(camera_error_message(&silent), "Could not access the camera.");
        assert_eq!(
            camera_error_message(&CameraError::StreamEnded {
                device: DeviceId::new("back")
            }),
            "Could not access the camera."
        );
    }

    #[test]
    fn test_rejected_message_is_shown_verbatim() {
        let error = ClientError::Rejected {
            status: 400,
            message: "Attendance already marked for this user".into(),
        };
        assert_eq!(error.message(), "Attendance already marked for this user");
    }
}
