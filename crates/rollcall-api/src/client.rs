//! reqwest-based client for the attendance backend.

use crate::payload::{ApiEnvelope, AttendanceSubmission, FacialData, RegistrationSubmission};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The backend answered and said no. Carries the server's own message
    /// verbatim when one was provided.
    #[error("server rejected request: {0}")]
    Rejected(String),
}

/// HTTP client for the attendance and registration collaborators.
pub struct AttendanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl AttendanceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    /// Submit one attendance record. The caller's state must not be
    /// advanced unless this returns `Ok`.
    pub async fn submit_attendance(&self, submission: &AttendanceSubmission) -> Result<(), ApiError> {
        tracing::info!(
            student = %submission.student_id,
            status = %submission.status,
            date = %submission.attendance_date,
            "submitting attendance"
        );
        self.post_checked("attendance", submission).await
    }

    /// Register a student's facial data (registration mode).
    pub async fn register_facial_data(
        &self,
        submission: &RegistrationSubmission,
    ) -> Result<(), ApiError> {
        tracing::info!(student = %submission.student_id, "registering facial data");
        self.post_checked("students/facial-data", submission).await
    }

    /// Fetch the stored facial data to verify against.
    pub async fn fetch_facial_data(&self, student_id: &str) -> Result<FacialData, ApiError> {
        let url = format!("{}/students/{student_id}/facial-data", self.base_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();

        let envelope: ApiEnvelope<FacialData> = response
            .json()
            .await
            .map_err(|e| ApiError::Rejected(format!("HTTP {status}: {e}")))?;

        if !envelope.success {
            return Err(ApiError::Rejected(
                envelope.message.unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }
        envelope
            .data
            .ok_or_else(|| ApiError::Rejected("response missing facial data".into()))
    }

    async fn post_checked<T: Serialize>(&self, path: &str, body: &T) -> Result<(), ApiError> {
        let url = format!("{}/{path}", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;
        let status = response.status();

        let envelope: ApiEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ApiError::Rejected(format!("HTTP {status}: {e}")))?;

        if !envelope.success {
            return Err(ApiError::Rejected(
                envelope.message.unwrap_or_else(|| format!("HTTP {status}")),
            ));
        }
        Ok(())
    }
}
