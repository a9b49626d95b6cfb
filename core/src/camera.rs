//! Camera capability for QR scanning.
//!
//! The kiosk never talks to camera hardware directly. Everything it needs is
//! expressed by the [`Camera`] trait:
//!
//! - enumerate the available devices
//! - open a decode stream on one device
//! - receive decoded text, one item per successfully decoded frame
//! - close the device by dropping the stream
//!
//! # Implementations
//!
//! - `WedgeCamera` (in `attendance-kiosk`): keyboard-wedge scanners that type the
//!   decoded text followed by a newline
//! - `ScriptedCamera` (in `kiosk-testing`): replays scripted frames for tests
//!
//! # Dyn Compatibility
//!
//! Like the storage traits, this trait returns `Pin<Box<dyn Future>>` so it can
//! be used as `Arc<dyn Camera>` inside reducer environments.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Opaque identifier of a camera device
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id
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

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A camera as reported by enumeration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Device identifier, stable for the lifetime of the process
    pub id: DeviceId,
    /// Human-readable label (e.g. "Back Camera")
    pub label: String,
}

impl CameraDevice {
    /// Create a device descriptor
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(id),
            label: label.into(),
        }
    }

    /// Whether the label suggests a rear-facing camera
    #[must_use]
    pub fn is_rear_facing(&self) -> bool {
        self.label.to_lowercase().contains("back")
    }
}

/// Detection region, centred in the frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRegion {
    /// Region width in frame units
    pub width: u32,
    /// Region height in frame units
    pub height: u32,
}

impl Default for ScanRegion {
    fn default() -> Self {
        Self {
            width: 250,
            height: 250,
        }
    }
}

/// Parameters handed to the decoder when a stream is opened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Decode attempts per second
    pub fps: u32,
    /// Central detection region
    pub region: ScanRegion,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fps: 10,
            region: ScanRegion::default(),
        }
    }
}

/// Camera failures
///
/// All of them are recoverable: the scan controller reports them as its
/// camera error and can be restarted by selecting a device again.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraError {
    /// The platform exposes no camera access at all (or permission was refused)
    #[error("Camera unavailable: {0}")]
    Unavailable(String),

    /// Enumeration succeeded but returned no video devices
    #[error("No camera found on your device.")]
    NoDevices,

    /// The device could not be opened (in use, permission denied, unknown id)
    #[error("Could not start camera {device}: {reason}")]
    DeviceStart {
        /// Device that failed to open
        device: DeviceId,
        /// Underlying reason
        reason: String,
    },

    /// The device failed while streaming
    #[error("Camera {device} failed: {reason}")]
    StreamFailed {
        /// Device that failed
        device: DeviceId,
        /// Underlying reason
        reason: String,
    },

    /// The decode stream finished although nobody stopped it
    #[error("Camera {device} stopped unexpectedly")]
    StreamEnded {
        /// Device whose stream ended
        device: DeviceId,
    },
}

/// Stream of decoded frames
///
/// Each `Ok` item is the text decoded from one frame; the decoder may report the
/// same text many times per second while a code stays in view. Dropping the
/// stream closes the device.
pub type DecodeStream = Pin<Box<dyn Stream<Item = Result<String, CameraError>> + Send>>;

/// Camera capability
pub trait Camera: Send + Sync {
    /// List the available video input devices, in platform order.
    ///
    /// # Errors
    ///
    /// - [`CameraError::Unavailable`] if the platform has no camera access
    fn enumerate_devices(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CameraDevice>, CameraError>> + Send + '_>>;

    /// Open a decode stream on `device`.
    ///
    /// # Errors
    ///
    /// - [`CameraError::DeviceStart`] if the device cannot be opened
    fn open_stream(
        &self,
        device: &DeviceId,
        config: StreamConfig,
    ) -> Pin<Box<dyn Future<Output = Result<DecodeStream, CameraError>> + Send + '_>>;
}

/// Pick the device to scan with.
///
/// An explicit choice wins when it names an enumerated device. Otherwise the
/// first rear-facing device is preferred, falling back to the first device.
#[must_use]
pub fn preferred_device<'a>(
    devices: &'a [CameraDevice],
    explicit: Option<&DeviceId>,
) -> Option<&'a CameraDevice> {
    if let Some(choice) = explicit {
        if let Some(device) = devices.iter().find(|d| &d.id == choice) {
            return Some(device);
        }
    }

    devices
        .iter()
        .find(|d| d.is_rear_facing())
        .or_else(|| devices.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn front_and_back() -> Vec<CameraDevice> {
        vec![
            CameraDevice::new("a", "Front"),
            CameraDevice::new("b", "Back Camera"),
        ]
    }

    #[test]
    fn test_prefers_back_camera_without_choice() {
        let devices = front_and_back();
        let selected = preferred_device(&devices, None).map(|d| d.id.as_str());
        assert_eq!(selected, Some("b"));
    }

    #[test]
    fn test_explicit_choice_wins() {
        let devices = front_and_back();
        let choice = DeviceId::new("a");
        let selected = preferred_device(&devices, Some(&choice)).map(|d| d.id.as_str());
        assert_eq!(selected, Some("a"));
    }

    #[test]
    fn test_unknown_choice_falls_back_to_policy() {
        let devices = front_and_back();
        let choice = DeviceId::new("zzz");
        let selected = preferred_device(&devices, Some(&choice)).map(|d| d.id.as_str());
        assert_eq!(selected, Some("b"));
    }

    #[test]
    fn test_first_device_when_no_rear_camera() {
        let devices = vec![
            CameraDevice::new("x", "Integrated Webcam"),
            CameraDevice::new("y", "USB Camera"),
        ];
        let selected = preferred_device(&devices, None).map(|d| d.id.as_str());
        assert_eq!(selected, Some("x"));
    }

    #[test]
    fn test_no_devices() {
        assert!(preferred_device(&[], None).is_none());
    }

    #[test]
    fn test_rear_facing_is_case_insensitive() {
        assert!(CameraDevice::new("1", "camera2 1, facing BACK").is_rear_facing());
        assert!(!CameraDevice::new("2", "Front").is_rear_facing());
    }

    #[test]
    fn test_default_stream_config() {
        let config = StreamConfig::default();
        assert_eq!(config.fps, 10);
        assert_eq!(config.region, ScanRegion { width: 250, height: 250 });
    }

    proptest! {
        #[test]
        fn prop_selection_is_always_an_enumerated_device(
            labels in proptest::collection::vec("[a-zA-Z ]{0,12}", 1..6)
        ) {
            let devices: Vec<CameraDevice> = labels
                .iter()
                .enumerate()
                .map(|(i, label)| CameraDevice::new(i.to_string(), label.clone()))
                .collect();

            let selected = preferred_device(&devices, None);
            prop_assert!(selected.is_some());
            let selected = selected.map(|d| d.id.clone());
            prop_assert!(devices.iter().any(|d| Some(&d.id) == selected.as_ref()));

            if devices.iter().any(CameraDevice::is_rear_facing) {
                let chosen = devices.iter().find(|d| Some(&d.id) == selected.as_ref());
                prop_assert!(chosen.is_some_and(CameraDevice::is_rear_facing));
            }
        }
    }
}
