//! Scripted camera.
//!
//! Replays a per-device timeline of decoded frames. Works with paused tokio
//! time, so scanner timing can be tested without waiting.
//!
//! The camera counts how many streams are open at once; a stream counts as open
//! from `open_stream` until it is dropped.

use kiosk_core::camera::{Camera, CameraDevice, CameraError, DecodeStream, DeviceId, StreamConfig};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One step of a device timeline
#[derive(Clone, Debug)]
pub struct ScriptedFrame {
    /// Wait before this frame, relative to the previous one
    pub after: Duration,
    /// What the decoder reports
    pub item: Result<String, CameraError>,
}

impl ScriptedFrame {
    /// A decoded frame after `after`
    #[must_use]
    pub fn text(after: Duration, text: impl Into<String>) -> Self {
        Self {
            after,
            item: Ok(text.into()),
        }
    }

    /// A device failure after `after`
    #[must_use]
    pub const fn error(after: Duration, error: CameraError) -> Self {
        Self { after, item: Err(error) }
    }

    /// The same code held in view: `count` reads, `interval` apart
    #[must_use]
    pub fn held(text: &str, interval: Duration, count: usize) -> Vec<Self> {
        (0..count).map(|_| Self::text(interval, text)).collect()
    }
}

#[derive(Debug, Default)]
struct StreamCounters {
    open: AtomicUsize,
    max_open: AtomicUsize,
    opened: Mutex<Vec<DeviceId>>,
}

struct OpenGuard(Arc<StreamCounters>);

impl OpenGuard {
    fn new(counters: &Arc<StreamCounters>, device: &DeviceId) -> Self {
        let now_open = counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_open.fetch_max(now_open, Ordering::SeqCst);
        counters
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device.clone());
        Self(Arc::clone(counters))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Camera replaying scripted frames
#[derive(Clone, Debug)]
pub struct ScriptedCamera {
    devices: Vec<CameraDevice>,
    scripts: HashMap<DeviceId, Vec<ScriptedFrame>>,
    enumerate_error: Option<CameraError>,
    open_failures: HashMap<DeviceId, String>,
    end_after_script: bool,
    counters: Arc<StreamCounters>,
}

impl ScriptedCamera {
    /// Camera exposing `devices`, none of which decode anything yet
    #[must_use]
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            scripts: HashMap::new(),
            enumerate_error: None,
            open_failures: HashMap::new(),
            end_after_script: false,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    /// Replay `frames` every time `device` is opened
    #[must_use]
    pub fn with_frames(mut self, device: &str, frames: impl IntoIterator<Item = ScriptedFrame>) -> Self {
        self.scripts.insert(DeviceId::new(device), frames.into_iter().collect());
        self
    }

    /// Make enumeration fail
    #[must_use]
    pub fn failing_enumeration(mut self, error: CameraError) -> Self {
        self.enumerate_error = Some(error);
        self
    }

    /// Make opening `device` fail
    #[must_use]
    pub fn failing_open(mut self, device: &str, reason: impl Into<String>) -> Self {
        self.open_failures.insert(DeviceId::new(device), reason.into());
        self
    }

    /// End streams once their script is exhausted instead of idling
    #[must_use]
    pub const fn ending_after_script(mut self) -> Self {
        self.end_after_script = true;
        self
    }

    /// Streams open right now
    #[must_use]
    pub fn open_streams(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Highest number of streams that were open at the same time
    #[must_use]
    pub fn max_concurrent_streams(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }

    /// Devices opened so far, in order
    #[must_use]
    pub fn opened_devices(&self) -> Vec<DeviceId> {
        self.counters
            .opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Camera for ScriptedCamera {
    fn enumerate_devices(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CameraDevice>, CameraError>> + Send + '_>> {
        Box::pin(async move {
            match &self.enumerate_error {
                Some(error) => Err(error.clone()),
                None => Ok(self.devices.clone()),
            }
        })
    }

    fn open_stream(
        &self,
        device: &DeviceId,
        config: StreamConfig,
    ) -> Pin<Box<dyn Future<Output = Result<DecodeStream, CameraError>> + Send + '_>> {
        let device = device.clone();

        Box::pin(async move {
            if let Some(reason) = self.open_failures.get(&device) {
                return Err(CameraError::DeviceStart {
                    device,
                    reason: reason.clone(),
                });
            }
            if !self.devices.iter().any(|d| d.id == device) {
                return Err(CameraError::DeviceStart {
                    device,
                    reason: "unknown device".to_string(),
                });
            }

            tracing::debug!(device = %device, fps = config.fps, "Scripted stream opened");

            let frames = self.scripts.get(&device).cloned().unwrap_or_default();
            let end_after_script = self.end_after_script;
            let open = OpenGuard::new(&self.counters, &device);

            let stream: DecodeStream = Box::pin(async_stream::stream! {
                let _open = open;
                for frame in frames {
                    tokio::time::sleep(frame.after).await;
                    yield frame.item;
                }
                if !end_after_script {
                    futures::future::pending::<()>().await;
                }
            });
            Ok(stream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn camera() -> ScriptedCamera {
        ScriptedCamera::new(vec![CameraDevice::new("a", "Front"), CameraDevice::new("b", "Back Camera")])
            .with_frames("b", ScriptedFrame::held("user1", Duration::from_millis(100), 2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_frames_then_idles() -> Result<(), CameraError> {
        let camera = camera();
        let mut stream = camera.open_stream(&DeviceId::new("b"), StreamConfig::default()).await?;

        assert_eq!(stream.next().await, Some(Ok("user1".to_string())));
        assert_eq!(stream.next().await, Some(Ok("user1".to_string())));

        let idle = tokio::time::timeout(Duration::from_secs(60), stream.next()).await;
        assert!(idle.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_counts_open_streams() -> Result<(), CameraError> {
        let camera = camera();

        let first = camera.open_stream(&DeviceId::new("a"), StreamConfig::default()).await?;
        let second = camera.open_stream(&DeviceId::new("b"), StreamConfig::default()).await?;
        assert_eq!(camera.open_streams(), 2);

        drop(first);
        drop(second);
        assert_eq!(camera.open_streams(), 0);
        assert_eq!(camera.max_concurrent_streams(), 2);
        assert_eq!(camera.opened_devices(), vec![DeviceId::new("a"), DeviceId::new("b")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_failure() {
        let camera = camera().failing_open("a", "in use");
        let result = camera.open_stream(&DeviceId::new("a"), StreamConfig::default()).await;

        assert!(matches!(result, Err(CameraError::DeviceStart { reason, .. }) if reason == "in use"));
        assert_eq!(camera.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_enumeration_failure() {
        let camera = camera().failing_enumeration(CameraError::Unavailable("no camera api".into()));
        assert!(matches!(camera.enumerate_devices().await, Err(CameraError::Unavailable(_))));
    }
}
