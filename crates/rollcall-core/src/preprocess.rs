//! Grayscale sampling helpers shared by the detection and embedding stages.

use ndarray::Array4;

/// Bilinear sample of a grayscale buffer at sub-pixel coordinates.
/// Coordinates are clamped to the frame, so callers may sample slightly
/// outside without wrapping.
pub fn bilinear_sample(gray: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = (x.floor() as i64).clamp(0, width as i64 - 1) as usize;
    let y0 = (y.floor() as i64).clamp(0, height as i64 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x.floor()).clamp(0.0, 1.0);
    let fy = (y - y.floor()).clamp(0.0, 1.0);

    let tl = gray[y0 * width + x0] as f32;
    let tr = gray[y0 * width + x1] as f32;
    let bl = gray[y1 * width + x0] as f32;
    let br = gray[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy)
        + tr * fx * (1.0 - fy)
        + bl * (1.0 - fx) * fy
        + br * fx * fy
}

/// Write a normalized grayscale value into all three channels of a NCHW
/// tensor. Both models take RGB input; grayscale frames replicate Y.
pub fn put_gray3(tensor: &mut Array4<f32>, y: usize, x: usize, value: f32) {
    tensor[[0, 0, y, x]] = value;
    tensor[[0, 1, y, x]] = value;
    tensor[[0, 2, y, x]] = value;
}
