//! 128-dimensional face embedding via ONNX Runtime.
//!
//! Crops the detected face box (with margin), resizes to the model input,
//! and L2-normalizes the resulting descriptor.

use crate::descriptor::{Descriptor, DESCRIPTOR_DIM};
use crate::detector::FaceBox;
use crate::preprocess::{bilinear_sample, put_gray3};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMB_INPUT_SIZE: usize = 112;
const EMB_MEAN: f32 = 127.5;
const EMB_STD: f32 = 127.5;
/// Fraction of box size added on each side before cropping, so the crop
/// keeps chin and forehead context the detector box tends to cut off.
const EMB_CROP_MARGIN: f32 = 0.15;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("embedding inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub(crate) struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded face embedding model");

        Ok(Self { session })
    }

    /// Extract a descriptor for one detected face in a grayscale frame.
    pub fn extract(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
        face: &FaceBox,
    ) -> Result<Descriptor, EmbedderError> {
        let crop = crop_face(gray, width as usize, height as usize, face);
        let input = preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::Inference(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(EmbedderError::Inference(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distances stay in a stable range.
        let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        let values: Vec<f32> = if norm > 0.0 {
            raw.iter().map(|v| v / norm).collect()
        } else {
            raw.to_vec()
        };

        Descriptor::from_vec(values).map_err(|e| EmbedderError::Inference(e.to_string()))
    }
}

/// Crop the face region (box plus margin) and resize it to the embedding
/// input size with bilinear sampling. Sampling clamps at frame edges, so
/// boxes that spill outside the frame are handled without special cases.
fn crop_face(gray: &[u8], width: usize, height: usize, face: &FaceBox) -> Vec<u8> {
    let margin_x = face.width * EMB_CROP_MARGIN;
    let margin_y = face.height * EMB_CROP_MARGIN;
    let x0 = face.x - margin_x;
    let y0 = face.y - margin_y;
    let crop_w = face.width + 2.0 * margin_x;
    let crop_h = face.height + 2.0 * margin_y;

    let mut crop = vec![0u8; EMB_INPUT_SIZE * EMB_INPUT_SIZE];
    for y in 0..EMB_INPUT_SIZE {
        let sy = y0 + (y as f32 + 0.5) / EMB_INPUT_SIZE as f32 * crop_h - 0.5;
        for x in 0..EMB_INPUT_SIZE {
            let sx = x0 + (x as f32 + 0.5) / EMB_INPUT_SIZE as f32 * crop_w - 0.5;
            let v = bilinear_sample(gray, width, height, sx, sy);
            crop[y * EMB_INPUT_SIZE + x] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    crop
}

/// Preprocess a 112x112 grayscale crop into a NCHW float tensor.
fn preprocess(crop: &[u8]) -> Array4<f32> {
    let size = EMB_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = crop.get(y * size + x).copied().unwrap_or(0) as f32;
            put_gray3(&mut tensor, y, x, (pixel - EMB_MEAN) / EMB_STD);
        }
    }

    tensor
}
