//! Pixel → angle conversion.

use ndarray::{Array1, ArrayView1};

use crate::{FeatureError, Result};

/// Angular offsets of pixel points from a view's optical center.
///
/// Each coordinate is normalized against the image extent and scaled to the
/// half field of view, so the center pixel maps to `0` and the image edges to
/// `±fov / 2`. Angles are in the same unit as the view angles (degrees
/// throughout this workspace). Returns `(horizontal, vertical)`.
pub fn calculate_angles(
    xs: ArrayView1<'_, f32>,
    ys: ArrayView1<'_, f32>,
    h_view_angle: f32,
    v_view_angle: f32,
    width: u32,
    height: u32,
) -> Result<(Array1<f32>, Array1<f32>)> {
    if xs.len() != ys.len() {
        return Err(FeatureError::AngleInput(format!(
            "{} x coordinates but {} y coordinates",
            xs.len(),
            ys.len()
        )));
    }
    if width == 0 || height == 0 {
        return Err(FeatureError::AngleInput(format!(
            "empty image extent {width}x{height}"
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let h_angles = xs.mapv(|x| (x / w - 0.5) * h_view_angle);
    let v_angles = ys.mapv(|y| (y / h - 0.5) * v_view_angle);
    Ok((h_angles, v_angles))
}
