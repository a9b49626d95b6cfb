//! State, actions and environment of the scan controller.

use chrono::{DateTime, Utc};
use kiosk_core::camera::{Camera, CameraDevice, CameraError, DeviceId, StreamConfig};
use kiosk_core::environment::Clock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of the camera handle.
///
/// Transitions are serialized: a device switch always passes through
/// `Stopping` and only starts the next device once the previous stream has
/// been released.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ScanPhase {
    /// No stream is open
    #[default]
    Idle,
    /// Waiting for the device list
    Enumerating,
    /// Opening a stream on `device`
    Starting {
        /// Device being opened
        device: DeviceId,
    },
    /// Decoding frames from `device`
    Running {
        /// Device in use
        device: DeviceId,
    },
    /// Releasing the stream; `next` is started afterwards if set
    Stopping {
        /// Device to start once the stream is released
        next: Option<DeviceId>,
    },
}

/// A burst of reads being collapsed into one candidate.
///
/// The window opens on the first read and is not extended by later reads;
/// the most recent text wins when it closes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebounceWindow {
    /// Latest text read inside the window
    pub text: String,
    /// When the first read arrived
    pub opened_at: DateTime<Utc>,
    /// Timer sequence number the window is waiting for
    pub seq: u64,
}

/// Suppression of repeated candidates for one text.
///
/// Each emitted text gets its own cooldown and timer; a different text read
/// meanwhile neither ends nor restarts it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cooldown {
    /// When the text was emitted
    pub started_at: DateTime<Utc>,
    /// Timer sequence number that ends the cooldown
    pub seq: u64,
}

/// Scan session state
#[derive(Clone, Debug, Default)]
pub struct ScanState {
    /// Camera lifecycle
    pub phase: ScanPhase,
    /// Epoch of the current stream or enumeration; feedback from older epochs is ignored
    pub session: u64,
    /// Devices from the last enumeration
    pub devices: Vec<CameraDevice>,
    /// Device explicitly chosen by the operator
    pub user_choice: Option<DeviceId>,
    /// Open debounce window, if any
    pub debounce: Option<DebounceWindow>,
    /// Last text read from the camera
    pub last_decoded: Option<String>,
    /// Running cooldowns keyed by emitted text
    pub cooldowns: BTreeMap<String, Cooldown>,
    /// Last camera failure, cleared by `DismissError` or a successful restart
    pub camera_error: Option<CameraError>,
    /// Candidates emitted since the controller was created
    pub candidates_emitted: u64,
    /// Debounced reads dropped by the cooldown
    pub suppressed: u64,
    /// Source of timer sequence numbers
    pub(crate) timer_seq: u64,
}

impl ScanState {
    /// Device whose stream is starting or running
    #[must_use]
    pub const fn active_device(&self) -> Option<&DeviceId> {
        match &self.phase {
            ScanPhase::Starting { device } | ScanPhase::Running { device } => Some(device),
            _ => None,
        }
    }

    /// Whether any cooldown is suppressing repeats
    #[must_use]
    pub fn cooldown_active(&self) -> bool {
        !self.cooldowns.is_empty()
    }

    /// Cooldown running for `text`, if any
    #[must_use]
    pub fn cooldown_for(&self, text: &str) -> Option<&Cooldown> {
        self.cooldowns.get(text)
    }

    /// Whether a stream is starting or running
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        matches!(self.phase, ScanPhase::Starting { .. } | ScanPhase::Running { .. })
    }

    pub(crate) fn next_timer_seq(&mut self) -> u64 {
        self.timer_seq += 1;
        self.timer_seq
    }

    /// Drop everything that only lives while a stream runs
    pub(crate) fn reset_session(&mut self) {
        self.debounce = None;
        self.last_decoded = None;
        self.cooldowns.clear();
    }
}

/// Scan controller actions
#[derive(Clone, Debug)]
pub enum ScanAction {
    // Commands
    /// Enumerate devices and start the preferred one
    Start,
    /// Switch to `device_id`, stopping the current stream first
    SelectDevice {
        /// Device to use from now on
        device_id: DeviceId,
    },
    /// Release the camera
    Stop,
    /// Clear the camera error
    DismissError,

    // Feedback from effects
    /// Device enumeration finished
    DevicesListed {
        /// Epoch the enumeration belongs to
        session: u64,
        /// Enumerated devices
        result: Result<Vec<CameraDevice>, CameraError>,
    },
    /// The device opened and frames are flowing
    StreamStarted {
        /// Stream epoch
        session: u64,
        /// Opened device
        device: DeviceId,
    },
    /// One frame was decoded
    FrameDecoded {
        /// Stream epoch
        session: u64,
        /// Decoded text
        text: String,
    },
    /// The device failed to open or failed while streaming
    StreamFailed {
        /// Stream epoch
        session: u64,
        /// What went wrong
        error: CameraError,
    },
    /// The debounce window closed
    DebounceElapsed {
        /// Stream epoch
        session: u64,
        /// Timer sequence number
        seq: u64,
    },
    /// The cooldown ended
    CooldownElapsed {
        /// Stream epoch
        session: u64,
        /// Timer sequence number
        seq: u64,
    },
    /// Decode loop and timers are gone
    StreamReleased {
        /// Epoch of the released stream
        session: u64,
    },

    // Output
    /// The camera failed in the current session; surfaced to the operator
    CameraFailed {
        /// What went wrong
        error: CameraError,
    },
    /// A clean candidate attendee identifier
    CandidateDetected {
        /// Decoded text
        text: String,
    },
}

/// Timing of the scan pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanConfig {
    /// Decoder parameters (10 fps, 250x250 region)
    pub stream: StreamConfig,
    /// Burst collapse window
    pub debounce: Duration,
    /// Same-text suppression window
    pub cooldown: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            debounce: Duration::from_millis(300),
            cooldown: Duration::from_millis(3000),
        }
    }
}

/// Dependencies of the scan reducer
#[derive(Clone)]
pub struct ScanEnvironment {
    /// Camera capability
    pub camera: Arc<dyn Camera>,
    /// Wall clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Timing
    pub config: ScanConfig,
}

impl ScanEnvironment {
    /// Create an environment
    #[must_use]
    pub fn new(camera: Arc<dyn Camera>, clock: Arc<dyn Clock>, config: ScanConfig) -> Self {
        Self {
            camera,
            clock,
            config,
        }
    }
}

impl std::fmt::Debug for ScanEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEnvironment")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
