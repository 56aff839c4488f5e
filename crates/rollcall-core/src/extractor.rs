//! Process-wide extraction pipeline: detection plus embedding behind a
//! lazily-initialized singleton.
//!
//! `ensure_loaded` has ensure-once semantics: concurrent callers await the
//! same in-flight initialization instead of loading the models twice, and
//! every call after the first successful load is a no-op.

use crate::descriptor::Descriptor;
use crate::detector::{FaceBox, FaceDetector};
use crate::embedder::FaceEmbedder;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug)]
pub enum ExtractorError {
    /// Model assets could not be loaded. Fatal to any subsequent capture.
    #[error("model load failed: {0}")]
    ModelLoad(String),
    /// Zero faces, or more than one: single-face semantics treat an
    /// ambiguous frame the same as an empty one.
    #[error("no usable face in frame: expected exactly one, found {candidates}")]
    NoFaceDetected { candidates: usize },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Locations of the two ONNX model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
}

static EXTRACTOR: OnceCell<Extractor> = OnceCell::const_new();

/// The loaded model pair. Read-shared process-wide after initialization;
/// the sessions sit behind mutexes because inference takes `&mut`.
pub struct Extractor {
    detector: Mutex<FaceDetector>,
    embedder: Mutex<FaceEmbedder>,
}

impl Extractor {
    /// Get the process-wide extractor, loading the models on first call.
    ///
    /// Loading happens on the blocking pool; concurrent callers share one
    /// initialization. A failed load is surfaced to every waiter and the
    /// next call starts a fresh attempt.
    pub async fn ensure_loaded(paths: &ModelPaths) -> Result<&'static Extractor, ExtractorError> {
        EXTRACTOR
            .get_or_try_init(|| {
                let paths = paths.clone();
                async move {
                    tokio::task::spawn_blocking(move || Extractor::load(&paths))
                        .await
                        .map_err(|e| ExtractorError::ModelLoad(format!("load task aborted: {e}")))?
                }
            })
            .await
    }

    fn load(paths: &ModelPaths) -> Result<Self, ExtractorError> {
        let detector =
            FaceDetector::load(&paths.detector).map_err(|e| ExtractorError::ModelLoad(e.to_string()))?;
        let embedder =
            FaceEmbedder::load(&paths.embedder).map_err(|e| ExtractorError::ModelLoad(e.to_string()))?;

        tracing::info!(
            detector = %paths.detector.display(),
            embedder = %paths.embedder.display(),
            "face models loaded"
        );

        Ok(Self {
            detector: Mutex::new(detector),
            embedder: Mutex::new(embedder),
        })
    }

    /// Detect the single face in a grayscale frame and return its
    /// descriptor. Suspending: inference runs on the blocking pool.
    pub async fn detect(
        &'static self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<Descriptor, ExtractorError> {
        tokio::task::spawn_blocking(move || self.detect_blocking(&pixels, width, height))
            .await
            .map_err(|e| ExtractorError::Inference(format!("inference task aborted: {e}")))?
    }

    fn detect_blocking(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Descriptor, ExtractorError> {
        let faces = {
            let mut detector = self
                .detector
                .lock()
                .map_err(|_| ExtractorError::Inference("detector mutex poisoned".into()))?;
            detector
                .detect(pixels, width, height)
                .map_err(|e| ExtractorError::Inference(e.to_string()))?
        };

        let face = sole_face(faces)?;
        tracing::debug!(confidence = face.confidence, "face selected for embedding");

        let mut embedder = self
            .embedder
            .lock()
            .map_err(|_| ExtractorError::Inference("embedder mutex poisoned".into()))?;
        embedder
            .extract(pixels, width, height, &face)
            .map_err(|e| ExtractorError::Inference(e.to_string()))
    }
}

/// Enforce single-face semantics on a detection result.
fn sole_face(mut faces: Vec<FaceBox>) -> Result<FaceBox, ExtractorError> {
    match faces.len() {
        1 => Ok(faces.remove(0)),
        candidates => {
            tracing::warn!(candidates, "frame rejected: not exactly one face");
            Err(ExtractorError::NoFaceDetected { candidates })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(conf: f32) -> FaceBox {
        FaceBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: conf }
    }

    #[test]
    fn test_sole_face_accepts_exactly_one() {
        let f = sole_face(vec![face(0.9)]).unwrap();
        assert!((f.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_sole_face_rejects_empty() {
        let err = sole_face(vec![]).unwrap_err();
        assert!(matches!(err, ExtractorError::NoFaceDetected { candidates: 0 }));
    }

    #[test]
    fn test_sole_face_rejects_multiple() {
        let err = sole_face(vec![face(0.9), face(0.8)]).unwrap_err();
        assert!(matches!(err, ExtractorError::NoFaceDetected { candidates: 2 }));
    }
}
