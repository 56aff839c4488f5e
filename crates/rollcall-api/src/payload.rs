//! Wire types for the attendance and registration collaborators.
//! All payloads are JSON with camelCase keys, dates as `YYYY-MM-DD`.

use chrono::NaiveDate;
use rollcall_core::Descriptor;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The attendance decision handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(format!("unknown status {other:?} (present|absent|late)")),
        }
    }
}

/// Body of an attendance POST. The descriptor is present for face-verified
/// marking and absent for manual marking.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSubmission {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_face_descriptor: Option<Descriptor>,
    pub attendance_date: NaiveDate,
    pub status: AttendanceStatus,
}

/// A student's registered facial data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacialData {
    pub face_id: Uuid,
    pub face_descriptor: Descriptor,
    /// JPEG snapshot as a `data:image/jpeg;base64,` URI.
    pub face_image: String,
}

/// Body of a facial-data registration POST.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationSubmission {
    pub student_id: String,
    pub facial_data: FacialData,
}

/// Standard response envelope used by every backend endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::DESCRIPTOR_DIM;

    fn descriptor() -> Descriptor {
        Descriptor::from_vec(vec![0.1; DESCRIPTOR_DIM]).unwrap()
    }

    #[test]
    fn test_attendance_submission_shape() {
        let sub = AttendanceSubmission {
            student_id: "stu-42".into(),
            captured_face_descriptor: Some(descriptor()),
            attendance_date: NaiveDate::from_ymd_opt(2026, 8, 23).unwrap(),
            status: AttendanceStatus::Present,
        };

        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["studentId"], "stu-42");
        assert_eq!(json["attendanceDate"], "2026-08-23");
        assert_eq!(json["status"], "present");
        assert_eq!(
            json["capturedFaceDescriptor"].as_array().unwrap().len(),
            DESCRIPTOR_DIM
        );
    }

    #[test]
    fn test_manual_submission_omits_descriptor_key() {
        let sub = AttendanceSubmission {
            student_id: "stu-42".into(),
            captured_face_descriptor: None,
            attendance_date: NaiveDate::from_ymd_opt(2026, 8, 23).unwrap(),
            status: AttendanceStatus::Late,
        };

        let json = serde_json::to_value(&sub).unwrap();
        assert!(json.get("capturedFaceDescriptor").is_none());
        assert_eq!(json["status"], "late");
    }

    #[test]
    fn test_registration_submission_shape() {
        let sub = RegistrationSubmission {
            student_id: "stu-7".into(),
            facial_data: FacialData {
                face_id: Uuid::new_v4(),
                face_descriptor: descriptor(),
                face_image: "data:image/jpeg;base64,/9j/".into(),
            },
        };

        let json = serde_json::to_value(&sub).unwrap();
        let facial = &json["facialData"];
        assert!(facial["faceId"].is_string());
        assert_eq!(facial["faceDescriptor"].as_array().unwrap().len(), DESCRIPTOR_DIM);
        assert!(facial["faceImage"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::Absent,
            AttendanceStatus::Late,
        ] {
            let parsed: AttendanceStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("tardy".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_envelope_success_with_data() {
        let env: ApiEnvelope<FacialData> = serde_json::from_value(serde_json::json!({
            "success": true,
            "data": {
                "faceId": "8f2b0a34-7c1e-4a9b-9a63-0d1f6b2f9e11",
                "faceDescriptor": vec![0.1f32; DESCRIPTOR_DIM],
                "faceImage": "data:image/jpeg;base64,abc",
            },
        }))
        .unwrap();
        assert!(env.success);
        assert!(env.data.is_some());
        assert!(env.message.is_none());
    }

    #[test]
    fn test_envelope_failure_message() {
        let env: ApiEnvelope<serde_json::Value> = serde_json::from_value(serde_json::json!({
            "success": false,
            "message": "student not found",
        }))
        .unwrap();
        assert!(!env.success);
        assert_eq!(env.message.as_deref(), Some("student not found"));
    }
}
