//! SCRFD-style face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing.
//! The lightweight 500M variant without the landmark head is enough here:
//! the embedding stage crops on the bounding box alone.

use crate::preprocess::{bilinear_sample, put_gray3};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_SIZE: usize = 320;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_IOU: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;
/// 3 strides x (score, bbox) heads.
const DET_OUTPUT_COUNT: usize = 6;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("detection inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in source-frame coordinates.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// Letterbox mapping between source frame and square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    /// Fit a source frame inside a square `dst`x`dst` input, centered.
    fn fit(src_w: usize, src_h: usize, dst: usize) -> Self {
        let scale = (dst as f32 / src_w as f32).min(dst as f32 / src_h as f32);
        let pad_x = (dst as f32 - src_w as f32 * scale) / 2.0;
        let pad_y = (dst as f32 - src_h as f32 * scale) / 2.0;
        Self { scale, pad_x, pad_y }
    }

    /// Map a point in model-input space back to source-frame space.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub(crate) struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        if num_outputs < DET_OUTPUT_COUNT {
            return Err(DetectorError::Inference(format!(
                "detection model requires {DET_OUTPUT_COUNT} outputs (3 strides x score/bbox), got {num_outputs}"
            )));
        }

        tracing::info!(
            path = %model_path.display(),
            outputs = num_outputs,
            "loaded face detection model"
        );

        Ok(Self { session })
    }

    /// Detect faces in a grayscale frame, sorted by confidence descending.
    pub fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let (input, letterbox) = preprocess(gray, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in DET_STRIDES.iter().enumerate() {
            // Positional layout: [0-2] score heads, [3-5] bbox heads.
            let (_, scores) = outputs[pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, deltas) = outputs[pos + DET_STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Inference(format!("bboxes stride {stride}: {e}")))?;

            decode_stride(scores, deltas, stride, &letterbox, &mut candidates);
        }

        let mut faces = nms(candidates, DET_NMS_IOU);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(faces)
    }
}

/// Build the NCHW input tensor by sampling the source frame through the
/// letterbox mapping. Out-of-frame area gets the mean value, which
/// normalizes to 0.
fn preprocess(gray: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(width, height, DET_INPUT_SIZE);
    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));

    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    for y in 0..DET_INPUT_SIZE {
        for x in 0..DET_INPUT_SIZE {
            let (sx, sy) = letterbox.to_source(x as f32, y as f32);
            let pixel = if sx >= 0.0 && sx <= max_x && sy >= 0.0 && sy <= max_y {
                bilinear_sample(gray, width, height, sx, sy)
            } else {
                DET_MEAN
            };
            put_gray3(&mut tensor, y, x, (pixel - DET_MEAN) / DET_STD);
        }
    }

    (tensor, letterbox)
}

/// Decode one stride level of anchor-free outputs into source-space boxes.
fn decode_stride(
    scores: &[f32],
    deltas: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<FaceBox>,
) {
    let cells = DET_INPUT_SIZE / stride;
    let num_anchors = cells * cells * DET_ANCHORS_PER_CELL;

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }

        let off = idx * 4;
        if off + 3 >= deltas.len() {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_x = ((cell % cells) * stride) as f32;
        let anchor_y = ((cell / cells) * stride) as f32;

        // Offsets are in stride units around the anchor center.
        let (x1, y1) = letterbox.to_source(
            anchor_x - deltas[off] * stride as f32,
            anchor_y - deltas[off + 1] * stride as f32,
        );
        let (x2, y2) = letterbox.to_source(
            anchor_x + deltas[off + 2] * stride as f32,
            anchor_y + deltas[off + 3] * stride as f32,
        );

        out.push(FaceBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
}

/// Non-Maximum Suppression: keep the highest-confidence box per cluster.
fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
