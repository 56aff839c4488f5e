//! Capture-and-decide workflow: camera -> extractor -> comparator -> backend.
//!
//! One attempt walks `Idle -> Streaming -> Captured -> (Verified | Rejected)
//! -> Submitted -> Idle`, register mode skipping the comparison. The one
//! invariant everything here defends: every transition out of `Streaming`
//! releases the camera, on success and on every failure path.
//!
//! A verification mismatch is not an error. It is recorded as `absent` and
//! reported; a retry has to be an explicit re-invocation by the operator,
//! never an automatic loop.

use chrono::NaiveDate;
use rollcall_api::{
    ApiError, AttendanceStatus, AttendanceSubmission, FacialData, RegistrationSubmission,
};
use rollcall_core::{CapturedFace, Comparator, Descriptor, ExtractorError, VerificationOutcome};
use rollcall_hw::{snapshot_data_uri, CameraError, Frame, SnapshotError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("face pipeline: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("submission failed: {0}")]
    Submission(#[from] ApiError),
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },
}

/// Observable state of the current capture attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Streaming,
    Captured,
    Verified,
    Rejected,
    Submitted,
}

/// Camera acquisition seam. The production implementation wraps the V4L2
/// session; tests inject failures here.
#[allow(async_fn_in_trait)]
pub trait CameraPort {
    type Session: SessionPort;
    async fn open(&self) -> Result<Self::Session, CameraError>;
}

#[allow(async_fn_in_trait)]
pub trait SessionPort {
    async fn capture(&mut self) -> Result<Frame, CameraError>;
    /// Must be idempotent; the orchestrator calls it on every exit path.
    fn close(&mut self);
}

#[allow(async_fn_in_trait)]
pub trait ExtractorPort {
    async fn ensure_loaded(&self) -> Result<(), ExtractorError>;
    async fn extract(&self, frame: &Frame) -> Result<Descriptor, ExtractorError>;
}

#[allow(async_fn_in_trait)]
pub trait BackendPort {
    async fn submit_attendance(&self, submission: &AttendanceSubmission) -> Result<(), ApiError>;
    async fn register_facial_data(&self, submission: &RegistrationSubmission)
        -> Result<(), ApiError>;
    async fn fetch_facial_data(&self, student_id: &str) -> Result<FacialData, ApiError>;
}

/// Per-stage deadlines. Without them a hung camera or a stalled backend
/// would pin the session open indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub model_load: Duration,
    pub camera: Duration,
    pub extract: Duration,
    pub submit: Duration,
}

#[derive(Debug)]
pub struct AttendanceReport {
    pub status: AttendanceStatus,
    pub outcome: VerificationOutcome,
}

#[derive(Debug)]
pub struct RegistrationReport {
    pub face_id: Uuid,
}

pub struct Orchestrator<C, E, B> {
    camera: C,
    extractor: E,
    backend: B,
    comparator: Comparator,
    timeouts: Timeouts,
    state: CaptureState,
}

impl<C: CameraPort, E: ExtractorPort, B: BackendPort> Orchestrator<C, E, B> {
    pub fn new(camera: C, extractor: E, backend: B, comparator: Comparator, timeouts: Timeouts) -> Self {
        Self {
            camera,
            extractor,
            backend,
            comparator,
            timeouts,
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Registration mode: capture a face and submit it as the student's
    /// stored facial data. No comparison involved.
    pub async fn register(&mut self, student_id: &str) -> Result<RegistrationReport, OrchestratorError> {
        self.ensure_models().await?;
        let captured = self.capture_once().await?;

        let submission = RegistrationSubmission {
            student_id: student_id.to_string(),
            facial_data: FacialData {
                face_id: Uuid::new_v4(),
                face_descriptor: captured.descriptor,
                face_image: captured.image,
            },
        };
        let face_id = submission.facial_data.face_id;

        let result = self
            .timed("submission", self.timeouts.submit, async {
                self.backend.register_facial_data(&submission).await
            })
            .await;
        if let Err(e) = result.and_then(|r| r.map_err(OrchestratorError::from)) {
            self.transition(CaptureState::Idle);
            return Err(e);
        }

        self.transition(CaptureState::Submitted);
        self.transition(CaptureState::Idle);
        Ok(RegistrationReport { face_id })
    }

    /// Verification mode: capture, compare against the stored descriptor,
    /// and submit `present` on a match, `absent` otherwise.
    pub async fn verify(
        &mut self,
        student_id: &str,
        date: NaiveDate,
    ) -> Result<AttendanceReport, OrchestratorError> {
        self.ensure_models().await?;

        let stored = self
            .timed("facial data fetch", self.timeouts.submit, async {
                self.backend.fetch_facial_data(student_id).await
            })
            .await??;

        let captured = self.capture_once().await?;
        let outcome = self.comparator.compare(&captured.descriptor, &stored.face_descriptor);

        let status = if outcome.matched {
            self.transition(CaptureState::Verified);
            AttendanceStatus::Present
        } else {
            self.transition(CaptureState::Rejected);
            tracing::warn!(
                student = student_id,
                distance = outcome.distance,
                threshold = self.comparator.threshold(),
                "verification mismatch; recording absent, retry only on explicit re-invocation"
            );
            AttendanceStatus::Absent
        };

        let submission = AttendanceSubmission {
            student_id: student_id.to_string(),
            captured_face_descriptor: Some(captured.descriptor),
            attendance_date: date,
            status,
        };

        // A failed submission is never left as Verified/Rejected; the
        // attempt ends and the state machine lands back in Idle.
        let result = self
            .timed("submission", self.timeouts.submit, async {
                self.backend.submit_attendance(&submission).await
            })
            .await;
        if let Err(e) = result.and_then(|r| r.map_err(OrchestratorError::from)) {
            self.transition(CaptureState::Idle);
            return Err(e);
        }

        self.transition(CaptureState::Submitted);
        self.transition(CaptureState::Idle);
        Ok(AttendanceReport { status, outcome })
    }

    /// Manual marking: a directly chosen status, no camera involved.
    pub async fn mark_manual(
        &mut self,
        student_id: &str,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> Result<(), OrchestratorError> {
        let submission = AttendanceSubmission {
            student_id: student_id.to_string(),
            captured_face_descriptor: None,
            attendance_date: date,
            status,
        };

        self.timed("submission", self.timeouts.submit, async {
            self.backend.submit_attendance(&submission).await
        })
        .await??;
        Ok(())
    }

    async fn ensure_models(&self) -> Result<(), OrchestratorError> {
        self.timed("model load", self.timeouts.model_load, self.extractor.ensure_loaded())
            .await??;
        Ok(())
    }

    /// One capture attempt: open the camera, grab a frame, snapshot it and
    /// extract the descriptor. The session is closed before this returns,
    /// whatever happened.
    async fn capture_once(&mut self) -> Result<CapturedFace, OrchestratorError> {
        let mut session = self
            .timed("camera open", self.timeouts.camera, self.camera.open())
            .await??;
        self.transition(CaptureState::Streaming);

        let result = self.capture_with(&mut session).await;
        session.close();

        match result {
            Ok(captured) => {
                self.transition(CaptureState::Captured);
                Ok(captured)
            }
            Err(e) => {
                self.transition(CaptureState::Idle);
                Err(e)
            }
        }
    }

    async fn capture_with(&self, session: &mut C::Session) -> Result<CapturedFace, OrchestratorError> {
        let frame = self
            .timed("frame capture", self.timeouts.camera, session.capture())
            .await??;
        tracing::debug!(
            width = frame.width,
            height = frame.height,
            age_ms = frame.timestamp.elapsed().as_millis() as u64,
            "frame captured"
        );

        let image = snapshot_data_uri(&frame)?;
        let descriptor = self
            .timed("descriptor extraction", self.timeouts.extract, self.extractor.extract(&frame))
            .await??;

        Ok(CapturedFace { descriptor, image })
    }

    async fn timed<T>(
        &self,
        stage: &'static str,
        limit: Duration,
        fut: impl Future<Output = T>,
    ) -> Result<T, OrchestratorError> {
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            tracing::error!(stage, secs = limit.as_secs(), "pipeline stage timed out");
            OrchestratorError::Timeout { stage, secs: limit.as_secs() }
        })
    }

    fn transition(&mut self, next: CaptureState) {
        tracing::debug!(from = ?self.state, to = ?next, "capture state");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::DESCRIPTOR_DIM;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    fn descriptor(fill: f32) -> Descriptor {
        Descriptor::from_vec(vec![fill; DESCRIPTOR_DIM]).unwrap()
    }

    fn frame() -> Frame {
        Frame {
            data: vec![128u8; 64 * 48],
            width: 64,
            height: 48,
            timestamp: std::time::Instant::now(),
            is_dark: false,
        }
    }

    /// Shared flag recording whether the camera session ended up released.
    /// Starts true (nothing open yet), flips false on open, true on close.
    #[derive(Clone)]
    struct CameraProbe(Arc<AtomicBool>);

    impl CameraProbe {
        fn new() -> Self {
            Self(Arc::new(AtomicBool::new(true)))
        }
        fn released(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct MockCamera {
        fail_open: bool,
        fail_capture: bool,
        probe: CameraProbe,
    }

    impl MockCamera {
        fn good(probe: &CameraProbe) -> Self {
            Self { fail_open: false, fail_capture: false, probe: probe.clone() }
        }
    }

    struct MockSession {
        fail_capture: bool,
        probe: CameraProbe,
    }

    impl CameraPort for MockCamera {
        type Session = MockSession;

        async fn open(&self) -> Result<MockSession, CameraError> {
            if self.fail_open {
                return Err(CameraError::PermissionDenied("injected".into()));
            }
            self.probe.0.store(false, Ordering::SeqCst);
            Ok(MockSession { fail_capture: self.fail_capture, probe: self.probe.clone() })
        }
    }

    impl SessionPort for MockSession {
        async fn capture(&mut self) -> Result<Frame, CameraError> {
            if self.fail_capture {
                return Err(CameraError::CaptureFailed("injected".into()));
            }
            Ok(frame())
        }

        fn close(&mut self) {
            self.probe.0.store(true, Ordering::SeqCst);
        }
    }

    struct MockExtractor {
        fail_load: bool,
        descriptor: Option<Descriptor>,
        delay: Option<Duration>,
    }

    impl MockExtractor {
        fn yielding(d: Descriptor) -> Self {
            Self { fail_load: false, descriptor: Some(d), delay: None }
        }
    }

    impl ExtractorPort for MockExtractor {
        async fn ensure_loaded(&self) -> Result<(), ExtractorError> {
            if self.fail_load {
                return Err(ExtractorError::ModelLoad("injected".into()));
            }
            Ok(())
        }

        async fn extract(&self, _frame: &Frame) -> Result<Descriptor, ExtractorError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.descriptor
                .clone()
                .ok_or(ExtractorError::NoFaceDetected { candidates: 0 })
        }
    }

    #[derive(Default)]
    struct MockBackend {
        stored: Option<Descriptor>,
        fail_submit: bool,
        attendance: Arc<Mutex<Vec<AttendanceSubmission>>>,
        registrations: Arc<Mutex<Vec<RegistrationSubmission>>>,
    }

    impl BackendPort for MockBackend {
        async fn submit_attendance(&self, submission: &AttendanceSubmission) -> Result<(), ApiError> {
            if self.fail_submit {
                return Err(ApiError::Rejected("server said no".into()));
            }
            self.attendance.lock().unwrap().push(submission.clone());
            Ok(())
        }

        async fn register_facial_data(
            &self,
            submission: &RegistrationSubmission,
        ) -> Result<(), ApiError> {
            if self.fail_submit {
                return Err(ApiError::Rejected("server said no".into()));
            }
            self.registrations.lock().unwrap().push(submission.clone());
            Ok(())
        }

        async fn fetch_facial_data(&self, _student_id: &str) -> Result<FacialData, ApiError> {
            let stored = self
                .stored
                .clone()
                .ok_or_else(|| ApiError::Rejected("no facial data on file".into()))?;
            Ok(FacialData {
                face_id: Uuid::new_v4(),
                face_descriptor: stored,
                face_image: "data:image/jpeg;base64,stub".into(),
            })
        }
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            model_load: Duration::from_secs(5),
            camera: Duration::from_secs(5),
            extract: Duration::from_secs(5),
            submit: Duration::from_secs(5),
        }
    }

    fn orchestrator(
        camera: MockCamera,
        extractor: MockExtractor,
        backend: MockBackend,
    ) -> Orchestrator<MockCamera, MockExtractor, MockBackend> {
        Orchestrator::new(camera, extractor, backend, Comparator::default(), timeouts())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 23).unwrap()
    }

    #[tokio::test]
    async fn test_register_end_to_end() {
        let probe = CameraProbe::new();
        let registrations = Arc::new(Mutex::new(Vec::new()));
        let backend = MockBackend { registrations: registrations.clone(), ..Default::default() };
        let mut orch = orchestrator(
            MockCamera::good(&probe),
            MockExtractor::yielding(descriptor(0.1)),
            backend,
        );

        let report = orch.register("stu-1").await.unwrap();

        let subs = registrations.lock().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].student_id, "stu-1");
        assert_eq!(subs[0].facial_data.face_id, report.face_id);
        assert_eq!(subs[0].facial_data.face_descriptor.as_slice().len(), DESCRIPTOR_DIM);
        assert!(subs[0].facial_data.face_image.starts_with("data:image/jpeg;base64,"));

        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_verify_identical_descriptor_marks_present() {
        let probe = CameraProbe::new();
        let attendance = Arc::new(Mutex::new(Vec::new()));
        let backend = MockBackend {
            stored: Some(descriptor(0.1)),
            attendance: attendance.clone(),
            ..Default::default()
        };
        let mut orch = orchestrator(
            MockCamera::good(&probe),
            MockExtractor::yielding(descriptor(0.1)),
            backend,
        );

        let report = orch.verify("stu-2", date()).await.unwrap();

        assert_eq!(report.status, AttendanceStatus::Present);
        assert!(report.outcome.matched);
        assert_eq!(report.outcome.distance, 0.0);

        let subs = attendance.lock().unwrap();
        assert_eq!(subs[0].status, AttendanceStatus::Present);
        assert!(subs[0].captured_face_descriptor.is_some());
        assert!(probe.released());
    }

    #[tokio::test]
    async fn test_verify_distant_descriptor_marks_absent() {
        let probe = CameraProbe::new();
        let attendance = Arc::new(Mutex::new(Vec::new()));
        let backend = MockBackend {
            stored: Some(descriptor(0.0)),
            attendance: attendance.clone(),
            ..Default::default()
        };
        let mut orch = orchestrator(
            MockCamera::good(&probe),
            MockExtractor::yielding(descriptor(1.0)),
            backend,
        );

        let report = orch.verify("stu-3", date()).await.unwrap();

        assert_eq!(report.status, AttendanceStatus::Absent);
        assert!(!report.outcome.matched);
        assert!(report.outcome.distance > 0.6);

        // Mismatch is never softened into present or late.
        let subs = attendance.lock().unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, AttendanceStatus::Absent);
        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_permission_denied_surfaces_and_stays_idle() {
        let probe = CameraProbe::new();
        let camera = MockCamera { fail_open: true, fail_capture: false, probe: probe.clone() };
        let mut orch = orchestrator(camera, MockExtractor::yielding(descriptor(0.1)), MockBackend::default());

        let err = orch.register("stu-4").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Camera(CameraError::PermissionDenied(_))));
        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_capture_failure_releases_camera() {
        let probe = CameraProbe::new();
        let camera = MockCamera { fail_open: false, fail_capture: true, probe: probe.clone() };
        let mut orch = orchestrator(camera, MockExtractor::yielding(descriptor(0.1)), MockBackend::default());

        let err = orch.register("stu-5").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Camera(CameraError::CaptureFailed(_))));
        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_no_face_releases_camera_without_submission() {
        let probe = CameraProbe::new();
        let attendance = Arc::new(Mutex::new(Vec::new()));
        let backend = MockBackend {
            stored: Some(descriptor(0.0)),
            attendance: attendance.clone(),
            ..Default::default()
        };
        let extractor = MockExtractor { fail_load: false, descriptor: None, delay: None };
        let mut orch = orchestrator(MockCamera::good(&probe), extractor, backend);

        let err = orch.verify("stu-6", date()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Extractor(ExtractorError::NoFaceDetected { .. })
        ));
        assert!(attendance.lock().unwrap().is_empty());
        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_model_load_failure_surfaces_before_camera() {
        let probe = CameraProbe::new();
        let extractor = MockExtractor { fail_load: true, descriptor: None, delay: None };
        let mut orch = orchestrator(MockCamera::good(&probe), extractor, MockBackend::default());

        let err = orch.register("stu-7").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Extractor(ExtractorError::ModelLoad(_))));
        // Camera was never opened, so it is still in its released state.
        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_submission_failure_is_not_optimistically_submitted() {
        let probe = CameraProbe::new();
        let backend = MockBackend {
            stored: Some(descriptor(0.1)),
            fail_submit: true,
            ..Default::default()
        };
        let mut orch = orchestrator(
            MockCamera::good(&probe),
            MockExtractor::yielding(descriptor(0.1)),
            backend,
        );

        let err = orch.verify("stu-8", date()).await.unwrap_err();
        match err {
            OrchestratorError::Submission(ApiError::Rejected(msg)) => {
                assert_eq!(msg, "server said no");
            }
            other => panic!("expected submission failure, got {other:?}"),
        }
        // Not left as Verified either: the attempt is over.
        assert_eq!(orch.state(), CaptureState::Idle);
        assert!(probe.released());
    }

    #[tokio::test]
    async fn test_register_submission_failure_returns_to_idle() {
        let probe = CameraProbe::new();
        let backend = MockBackend { fail_submit: true, ..Default::default() };
        let mut orch = orchestrator(
            MockCamera::good(&probe),
            MockExtractor::yielding(descriptor(0.1)),
            backend,
        );

        let err = orch.register("stu-11").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Submission(_)));
        assert_eq!(orch.state(), CaptureState::Idle);
        assert!(probe.released());
    }

    #[tokio::test]
    async fn test_manual_mark_submits_without_descriptor() {
        let attendance = Arc::new(Mutex::new(Vec::new()));
        let backend = MockBackend { attendance: attendance.clone(), ..Default::default() };
        let probe = CameraProbe::new();
        let mut orch = orchestrator(MockCamera::good(&probe), MockExtractor::yielding(descriptor(0.1)), backend);

        orch.mark_manual("stu-9", date(), AttendanceStatus::Late).await.unwrap();

        let subs = attendance.lock().unwrap();
        assert_eq!(subs[0].status, AttendanceStatus::Late);
        assert!(subs[0].captured_face_descriptor.is_none());
        // Manual marking never touches the camera.
        assert!(probe.released());
    }

    #[tokio::test]
    async fn test_extraction_timeout_releases_camera() {
        let probe = CameraProbe::new();
        let extractor = MockExtractor {
            fail_load: false,
            descriptor: Some(descriptor(0.1)),
            delay: Some(Duration::from_millis(200)),
        };
        let mut orch = Orchestrator::new(
            MockCamera::good(&probe),
            extractor,
            MockBackend::default(),
            Comparator::default(),
            Timeouts {
                extract: Duration::from_millis(20),
                ..timeouts()
            },
        );

        let err = orch.register("stu-10").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Timeout { stage: "descriptor extraction", .. }
        ));
        assert!(probe.released());
        assert_eq!(orch.state(), CaptureState::Idle);
    }
}
