//! rollcall-api — JSON/HTTP client for the attendance backend.
//!
//! The backend owns the payload shapes; this crate mirrors them with serde
//! types and a thin reqwest client. No local state: a rejected request
//! leaves nothing half-updated on this side.

pub mod client;
mod payload;

pub use client::{ApiError, AttendanceClient};
pub use payload::{
    ApiEnvelope, AttendanceStatus, AttendanceSubmission, FacialData, RegistrationSubmission,
};
