//! Still-image snapshot encoding: grayscale frame to JPEG data URI.
//!
//! Decoupled from descriptor extraction; both read the same frame and
//! their order does not matter.

use crate::frame::Frame;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

const JPEG_QUALITY: u8 = 85;
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encode a captured frame as a `data:image/jpeg;base64,` URI for storage
/// and audit alongside the descriptor.
pub fn snapshot_data_uri(frame: &Frame) -> Result<String, SnapshotError> {
    let expected = (frame.width * frame.height) as usize;
    if frame.data.len() < expected {
        return Err(SnapshotError::ShortBuffer {
            expected,
            actual: frame.data.len(),
        });
    }

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
    encoder.encode(
        &frame.data[..expected],
        frame.width,
        frame.height,
        image::ExtendedColorType::L8,
    )?;

    Ok(format!(
        "{DATA_URI_PREFIX}{}",
        general_purpose::STANDARD.encode(&jpeg)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(width: u32, height: u32) -> Frame {
        Frame {
            data: (0..(width * height) as usize).map(|i| (i % 256) as u8).collect(),
            width,
            height,
            timestamp: std::time::Instant::now(),
            is_dark: false,
        }
    }

    #[test]
    fn test_data_uri_prefix() {
        let uri = snapshot_data_uri(&test_frame(32, 24)).unwrap();
        assert!(uri.starts_with(DATA_URI_PREFIX));
    }

    #[test]
    fn test_data_uri_decodes_to_jpeg_of_frame_size() {
        let uri = snapshot_data_uri(&test_frame(32, 24)).unwrap();
        let b64 = &uri[DATA_URI_PREFIX.len()..];
        let jpeg = general_purpose::STANDARD.decode(b64).unwrap();

        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(img.width(), 32);
        assert_eq!(img.height(), 24);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut frame = test_frame(32, 24);
        frame.data.truncate(10);
        let err = snapshot_data_uri(&frame).unwrap_err();
        assert!(matches!(err, SnapshotError::ShortBuffer { .. }));
    }
}
