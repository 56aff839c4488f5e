use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed length of every face descriptor produced by the embedding model.
pub const DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor must have exactly {DESCRIPTOR_DIM} elements, got {got}")]
    WrongLength { got: usize },
}

/// A face embedding: exactly [`DESCRIPTOR_DIM`] floats, immutable once built.
///
/// Partial or variable-length descriptors are rejected at construction, so
/// any two `Descriptor` values are always comparable. Serializes as a flat
/// JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn from_vec(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongLength { got: values.len() });
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance to another descriptor. Both sides are guaranteed
    /// [`DESCRIPTOR_DIM`] elements by construction.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::from_vec(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(d: Descriptor) -> Self {
        d.0
    }
}

/// A descriptor together with the encoded still image it was derived from.
///
/// Transient: lives only for the duration of a capture attempt unless the
/// caller submits it to the attendance backend.
#[derive(Debug, Clone)]
pub struct CapturedFace {
    pub descriptor: Descriptor,
    /// JPEG snapshot of the source frame as a `data:image/jpeg;base64,` URI.
    pub image: String,
}

/// Result of comparing two descriptors: the boolean decision plus the raw
/// distance that produced it, kept for audit logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerificationOutcome {
    pub matched: bool,
    pub distance: f32,
}
