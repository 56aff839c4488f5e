//! V4L2 camera session with an explicit open/close lifecycle.
//!
//! `Closed -> Streaming -> Closed`, no intermediate state exposed.
//! `close()` is idempotent and also runs on drop, so the device is
//! released on every exit path regardless of how the owner unwinds.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    /// Access refused or no camera present. User-recoverable.
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("camera busy: {0}")]
    DeviceBusy(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiation(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("camera session is closed")]
    SessionClosed,
}

/// Info about a discovered V4L2 capture device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// 8-bit grayscale, 1 byte/pixel.
    Grey,
}

/// An open camera bound to one V4L2 device node.
///
/// At most one active stream per session; the device handle is dropped on
/// `close()`, which releases the kernel resource.
pub struct CameraSession {
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl std::fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSession")
            .field("device", &self.device.as_ref().map(|_| "Device"))
            .field("width", &self.width)
            .field("height", &self.height)
            .field("device_path", &self.device_path)
            .field("pixel_format", &self.pixel_format)
            .finish()
    }
}

impl CameraSession {
    /// Open the device and negotiate a grayscale-convertible format.
    /// On success the session is `Streaming`; on failure it never existed.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::PermissionDenied(format!(
                "no camera device at {device_path}"
            )));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy(device_path.to_string())
            } else {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::FormatNegotiation(format!(
                "{device_path} does not support video capture"
            )));
        }

        tracing::info!(device = device_path, driver = %caps.driver, card = %caps.card, "opened camera");

        let mut fmt = device
            .format()
            .map_err(|e| CameraError::FormatNegotiation(format!("failed to get format: {e}")))?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = 640;
        fmt.height = 480;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiation(format!("failed to set format: {e}")))?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiation(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );

        Ok(Self {
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.device.is_some() {
            SessionState::Streaming
        } else {
            SessionState::Closed
        }
    }

    /// Capture a frame suitable for face detection.
    ///
    /// Holds one mmap stream for the whole call: the first `warmup` frames
    /// are discarded so auto-exposure can settle, then up to `max_attempts`
    /// frames are dequeued, skipping dark ones. The stream must outlive the
    /// loop: restarting streaming per frame resets exposure on many UVC
    /// drivers, so every dequeue would see a pre-settled dark frame.
    pub fn capture_usable_frame(
        &mut self,
        warmup: usize,
        max_attempts: usize,
    ) -> Result<Frame, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::SessionClosed)?;

        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        select_usable(warmup, max_attempts, || {
            let (buf, _meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let gray = self.buf_to_grayscale(buf)?;
            let is_dark = frame::is_dark_frame(&gray, 0.95);

            Ok(Frame {
                data: gray,
                width: self.width,
                height: self.height,
                timestamp: std::time::Instant::now(),
                is_dark,
            })
        })
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;

        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }

    /// Release the device. Idempotent: closing a closed session is a no-op.
    pub fn close(&mut self) {
        if let Some(device) = self.device.take() {
            drop(device);
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
            });
        }

        devices
    }

    #[cfg(test)]
    fn detached() -> Self {
        Self {
            device: None,
            width: 640,
            height: 480,
            device_path: "/dev/null".into(),
            pixel_format: PixelFormat::Grey,
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drive a frame source: discard `warmup` frames, then return the first
/// non-dark frame within `max_attempts`. If every attempt comes out dark
/// the last dark frame is returned anyway and the extractor reports the
/// absence of a face.
///
/// Warmup failures are ignored; a broken source surfaces on the first
/// real dequeue.
fn select_usable(
    warmup: usize,
    max_attempts: usize,
    mut next_frame: impl FnMut() -> Result<Frame, CameraError>,
) -> Result<Frame, CameraError> {
    for _ in 0..warmup {
        let _ = next_frame();
    }

    let mut last = None;
    for attempt in 0..max_attempts.max(1) {
        let frame = next_frame()?;
        if !frame.is_dark {
            return Ok(frame);
        }
        tracing::debug!(attempt, "skipping dark frame");
        last = Some(frame);
    }
    tracing::warn!(max_attempts, "all captured frames were dark");
    last.ok_or_else(|| CameraError::CaptureFailed("no frames captured".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_idempotent() {
        let mut session = CameraSession::detached();
        session.close();
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_capture_on_closed_session_fails() {
        let mut session = CameraSession::detached();
        let err = session.capture_usable_frame(2, 3).unwrap_err();
        assert!(matches!(err, CameraError::SessionClosed));
    }

    fn test_frame(is_dark: bool) -> Frame {
        Frame {
            data: vec![if is_dark { 0 } else { 128 }; 4],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            is_dark,
        }
    }

    #[test]
    fn test_select_usable_discards_warmup_then_skips_dark() {
        // Warmup eats the first two, the third is dark, the fourth is good.
        let frames = [true, true, true, false];
        let mut served = 0;

        let frame = select_usable(2, 5, || {
            let f = test_frame(frames[served]);
            served += 1;
            Ok(f)
        })
        .unwrap();

        assert!(!frame.is_dark);
        assert_eq!(served, 4, "one source drives warmup and capture alike");
    }

    #[test]
    fn test_select_usable_all_dark_returns_last_frame() {
        let mut served = 0;
        let frame = select_usable(0, 3, || {
            served += 1;
            Ok(test_frame(true))
        })
        .unwrap();

        assert!(frame.is_dark);
        assert_eq!(served, 3);
    }

    #[test]
    fn test_select_usable_propagates_capture_errors() {
        let err =
            select_usable(0, 3, || Err(CameraError::CaptureFailed("gone".into()))).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));
    }

    #[test]
    fn test_open_missing_device_is_permission_denied() {
        let err = CameraSession::open("/dev/video-does-not-exist").unwrap_err();
        assert!(matches!(err, CameraError::PermissionDenied(_)));
    }
}
