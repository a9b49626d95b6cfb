//! QR scan controller.
//!
//! Turns a camera into a clean stream of candidate attendee identifiers.
//! The logic lives in [`ScanReducer`]; [`ScanController`] wraps it in a
//! [`Store`] and exposes the operations the kiosk needs.
//!
//! # Example
//!
//! ```ignore
//! let controller = ScanController::new(camera, Arc::new(SystemClock), ScanConfig::default());
//! let mut events = controller.subscribe();
//!
//! controller.start().await?;
//! while let Some(event) = events.next().await {
//!     if let ScanEvent::Candidate(text) = event {
//!         println!("scanned {text}");
//!     }
//! }
//! ```

mod reducer;
mod types;


pub use reducer::{COOLDOWN_TIMER, DEBOUNCE_TIMER, DECODE_LOOP, ScanReducer};
pub use types::{
    Cooldown, DebounceWindow, ScanAction, ScanConfig, ScanEnvironment, ScanPhase, ScanState,
};

use kiosk_core::camera::{Camera, CameraDevice, CameraError, DeviceId};
use kiosk_core::effect::EffectId;
use kiosk_core::environment::Clock;
use kiosk_runtime::{StoreConfig, StoreError, store::Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

type ScanStore = Store<ScanState, ScanAction, ScanEnvironment, ScanReducer>;

/// Every decoded frame passes through the broadcast; at 10 fps this leaves a
/// subscriber several seconds of slack.
const EVENT_CAPACITY: usize = 256;

/// Something the kiosk reacts to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanEvent {
    /// A debounced, cooldown-filtered read
    Candidate(String),
    /// The camera opened `device`
    Started(DeviceId),
    /// The camera was released
    Released,
    /// The camera failed; the controller is idle again
    CameraError(CameraError),
}

/// Subscription to [`ScanEvent`]s
#[derive(Debug)]
pub struct ScanEvents {
    actions: broadcast::Receiver<ScanAction>,
}

impl ScanEvents {
    /// Wait for the next event. `None` once the controller is gone.
    pub async fn next(&mut self) -> Option<ScanEvent> {
        loop {
            match self.actions.recv().await {
                Ok(action) => {
                    if let Some(event) = Self::translate(action) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Scan event subscriber lagged");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn translate(action: ScanAction) -> Option<ScanEvent> {
        match action {
            ScanAction::CandidateDetected { text } => Some(ScanEvent::Candidate(text)),
            ScanAction::StreamStarted { device, .. } => Some(ScanEvent::Started(device)),
            ScanAction::StreamReleased { .. } => Some(ScanEvent::Released),
            // Raw failures may belong to an older session; the reducer
            // re-emits the ones it accepts as `CameraFailed`
            ScanAction::CameraFailed { error } => Some(ScanEvent::CameraError(error)),
            _ => None,
        }
    }
}

/// Owner of the camera handle
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ScanController {
    store: ScanStore,
    camera: Arc<dyn Camera>,
}

impl ScanController {
    /// Create an idle controller
    #[must_use]
    pub fn new(camera: Arc<dyn Camera>, clock: Arc<dyn Clock>, config: ScanConfig) -> Self {
        let environment = ScanEnvironment::new(Arc::clone(&camera), clock, config);
        let store = Store::with_config(
            ScanState::default(),
            ScanReducer::new(),
            environment,
            StoreConfig::default().with_broadcast_capacity(EVENT_CAPACITY),
        );
        Self { store, camera }
    }

    /// Enumerate the cameras, in platform order.
    ///
    /// # Errors
    ///
    /// [`CameraError::Unavailable`] when the platform exposes no camera access.
    pub async fn list_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        self.camera.enumerate_devices().await
    }

    /// Start scanning with the preferred device.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] after [`ScanController::teardown`].
    pub async fn start(&self) -> Result<(), StoreError> {
        self.store.send(ScanAction::Start).await.map(drop)
    }

    /// Scan with `device_id`, stopping the current stream first.
    ///
    /// A device that cannot be opened surfaces as [`ScanEvent::CameraError`].
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] after [`ScanController::teardown`].
    pub async fn select_device(&self, device_id: DeviceId) -> Result<(), StoreError> {
        self.store
            .send(ScanAction::SelectDevice { device_id })
            .await
            .map(drop)
    }

    /// Release the camera.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] after [`ScanController::teardown`].
    pub async fn stop(&self) -> Result<(), StoreError> {
        self.store.send(ScanAction::Stop).await.map(drop)
    }

    /// Clear the camera error.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownInProgress`] after [`ScanController::teardown`].
    pub async fn dismiss_error(&self) -> Result<(), StoreError> {
        self.store.send(ScanAction::DismissError).await.map(drop)
    }

    /// Subscribe to candidates and camera lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> ScanEvents {
        ScanEvents {
            actions: self.store.subscribe_actions(),
        }
    }

    /// Copy of the current scan state
    pub async fn snapshot(&self) -> ScanState {
        self.store.state(ScanState::clone).await
    }

    /// Effects still holding a slot (decode loop, timers)
    #[must_use]
    pub fn active_effects(&self) -> Vec<EffectId> {
        self.store.active_effect_ids()
    }

    /// Release the camera and cancel every timer, then refuse further commands.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShutdownTimeout`] if effects are still running after `timeout`.
    pub async fn teardown(&self, timeout: Duration) -> Result<(), StoreError> {
        tracing::info!("Tearing down scan controller");
        self.store.shutdown(timeout).await
    }
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController").finish_non_exhaustive()
    }
}
