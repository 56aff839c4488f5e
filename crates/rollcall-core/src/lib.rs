//! rollcall-core — Face descriptor extraction and comparison engine.
//!
//! A two-stage ONNX pipeline (SCRFD-style detection, then a 128-dimensional
//! embedding network) feeding a Euclidean-distance comparator. Models are
//! loaded once per process and shared read-only afterwards.

pub mod compare;
pub mod descriptor;
pub mod detector;
pub mod embedder;
pub mod extractor;
mod preprocess;

pub use compare::{Comparator, DEFAULT_MATCH_THRESHOLD};
pub use descriptor::{CapturedFace, Descriptor, DescriptorError, VerificationOutcome, DESCRIPTOR_DIM};
pub use extractor::{Extractor, ExtractorError, ModelPaths};

use std::path::PathBuf;

/// Default location for the ONNX model assets.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
