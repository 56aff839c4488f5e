//! rollcall-hw — Camera session management and frame handling.
//!
//! Owns the device-camera lifecycle as an explicit scoped resource:
//! acquire on open, guaranteed release on every exit path.

pub mod camera;
pub mod frame;
pub mod snapshot;

pub use camera::{CameraError, CameraSession, DeviceInfo, SessionState};
pub use frame::Frame;
pub use snapshot::{snapshot_data_uri, SnapshotError};
