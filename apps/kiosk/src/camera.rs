//! Keyboard-wedge scanner.
//!
//! Handheld QR scanners in keyboard mode "type" the decoded text followed by
//! Enter. [`WedgeCamera`] exposes such a scanner (or any line-oriented
//! reader, stdin by default) as a [`Camera`] with a single device.

use futures::StreamExt;
use kiosk_core::camera::{Camera, CameraDevice, CameraError, DecodeStream, DeviceId, StreamConfig};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::Mutex;

/// Id of the only device a [`WedgeCamera`] exposes
pub const WEDGE_DEVICE_ID: &str = "keyboard-wedge";

/// Label of the only device a [`WedgeCamera`] exposes
pub const WEDGE_DEVICE_LABEL: &str = "Keyboard wedge scanner";

type LineReader = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// Line-oriented scanner
///
/// Each non-blank line is one decoded frame. Clones share the reader; only
/// one stream reads at a time.
#[derive(Clone)]
pub struct WedgeCamera {
    lines: Arc<Mutex<LineReader>>,
}

impl WedgeCamera {
    /// Read scans from `reader`
    #[must_use]
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(reader).lines())),
        }
    }

    /// Read scans from standard input
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }

    fn device() -> CameraDevice {
        CameraDevice::new(WEDGE_DEVICE_ID, WEDGE_DEVICE_LABEL)
    }
}

impl std::fmt::Debug for WedgeCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WedgeCamera").finish_non_exhaustive()
    }
}

impl Camera for WedgeCamera {
    fn enumerate_devices(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<CameraDevice>, CameraError>> + Send + '_>> {
        Box::pin(async { Ok(vec![Self::device()]) })
    }

    fn open_stream(
        &self,
        device: &DeviceId,
        config: StreamConfig,
    ) -> Pin<Box<dyn Future<Output = Result<DecodeStream, CameraError>> + Send + '_>> {
        let device = device.clone();
        let lines = Arc::clone(&self.lines);

        Box::pin(async move {
            if device.as_str() != WEDGE_DEVICE_ID {
                return Err(CameraError::DeviceStart {
                    device,
                    reason: "unknown device".to_string(),
                });
            }

            tracing::debug!(device = %device, region = ?config.region, "Wedge scanner opened");

            let stream = async_stream::stream! {
                loop {
                    let next = lines.lock().await.next_line().await;
                    match next {
                        Ok(Some(line)) => {
                            let text = line.trim();
                            if !text.is_empty() {
                                yield Ok(text.to_string());
                            }
                        },
                        // End of input: the stream ends and the controller reports it
                        Ok(None) => break,
                        Err(error) => {
                            yield Err(CameraError::StreamFailed {
                                device: device.clone(),
                                reason: error.to_string(),
                            });
                            break;
                        },
                    }
                }
            };

            Ok(stream.boxed())
        })
    }
}
