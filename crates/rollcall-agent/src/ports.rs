//! Production implementations of the orchestrator seams, wiring the V4L2
//! camera, the ONNX extractor singleton, and the HTTP backend client.
//! Blocking hardware and inference work runs off the async workers.

use crate::orchestrator::{BackendPort, CameraPort, ExtractorPort, SessionPort};
use rollcall_api::{
    ApiError, AttendanceClient, AttendanceSubmission, FacialData, RegistrationSubmission,
};
use rollcall_core::{Descriptor, Extractor, ExtractorError, ModelPaths};
use rollcall_hw::{CameraError, CameraSession, Frame};

/// Opens the configured V4L2 device. Warmup frames are discarded at
/// capture time, on the same stream the real frame comes from, so
/// auto-exposure settles before the frame we keep.
pub struct V4lCameraPort {
    pub device: String,
    pub warmup_frames: usize,
    pub capture_attempts: usize,
}

pub struct V4lSessionPort {
    inner: CameraSession,
    warmup_frames: usize,
    capture_attempts: usize,
}

impl CameraPort for V4lCameraPort {
    type Session = V4lSessionPort;

    async fn open(&self) -> Result<V4lSessionPort, CameraError> {
        let device = self.device.clone();

        let inner = tokio::task::spawn_blocking(move || CameraSession::open(&device))
            .await
            .map_err(|e| CameraError::CaptureFailed(format!("camera task aborted: {e}")))??;

        Ok(V4lSessionPort {
            inner,
            warmup_frames: self.warmup_frames,
            capture_attempts: self.capture_attempts,
        })
    }
}

impl SessionPort for V4lSessionPort {
    async fn capture(&mut self) -> Result<Frame, CameraError> {
        let warmup = self.warmup_frames;
        let attempts = self.capture_attempts;
        tokio::task::block_in_place(|| self.inner.capture_usable_frame(warmup, attempts))
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

/// Extraction via the process-wide model singleton.
pub struct OnnxExtractorPort {
    paths: ModelPaths,
}

impl OnnxExtractorPort {
    pub fn new(paths: ModelPaths) -> Self {
        Self { paths }
    }
}

impl ExtractorPort for OnnxExtractorPort {
    async fn ensure_loaded(&self) -> Result<(), ExtractorError> {
        Extractor::ensure_loaded(&self.paths).await.map(|_| ())
    }

    async fn extract(&self, frame: &Frame) -> Result<Descriptor, ExtractorError> {
        let extractor = Extractor::ensure_loaded(&self.paths).await?;
        extractor
            .detect(frame.data.clone(), frame.width, frame.height)
            .await
    }
}

/// HTTP backend via the attendance client.
pub struct HttpBackendPort {
    client: AttendanceClient,
}

impl HttpBackendPort {
    pub fn new(client: AttendanceClient) -> Self {
        Self { client }
    }
}

impl BackendPort for HttpBackendPort {
    async fn submit_attendance(&self, submission: &AttendanceSubmission) -> Result<(), ApiError> {
        self.client.submit_attendance(submission).await
    }

    async fn register_facial_data(
        &self,
        submission: &RegistrationSubmission,
    ) -> Result<(), ApiError> {
        self.client.register_facial_data(submission).await
    }

    async fn fetch_facial_data(&self, student_id: &str) -> Result<FacialData, ApiError> {
        self.client.fetch_facial_data(student_id).await
    }
}
