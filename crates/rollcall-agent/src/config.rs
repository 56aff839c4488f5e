use rollcall_core::ModelPaths;
use std::path::PathBuf;

/// Agent configuration, loaded from `ROLLCALL_*` environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Base URL of the attendance backend API.
    pub api_base_url: String,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Frames to discard after open (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Capture attempts per frame request before giving up on dark frames.
    pub capture_attempts: usize,
    /// Timeouts in seconds for the individual pipeline stages.
    pub model_load_timeout_secs: u64,
    pub camera_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub submit_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_model_dir());

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            api_base_url: std::env::var("ROLLCALL_API_URL")
                .unwrap_or_else(|_| "http://localhost:5000/api".to_string()),
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", rollcall_core::DEFAULT_MATCH_THRESHOLD),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            capture_attempts: env_usize("ROLLCALL_CAPTURE_ATTEMPTS", 9),
            model_load_timeout_secs: env_u64("ROLLCALL_MODEL_LOAD_TIMEOUT_SECS", 30),
            camera_timeout_secs: env_u64("ROLLCALL_CAMERA_TIMEOUT_SECS", 10),
            extract_timeout_secs: env_u64("ROLLCALL_EXTRACT_TIMEOUT_SECS", 15),
            submit_timeout_secs: env_u64("ROLLCALL_SUBMIT_TIMEOUT_SECS", 10),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.model_dir.join("det_500m.onnx"),
            embedder: self.model_dir.join("mbf_128.onnx"),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
