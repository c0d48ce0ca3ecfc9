// panofeat-detect/src/lib.rs
// ============================================================
// panofeat-detect  –  Region-detection stage
// Wraps a Mask R-CNN style region detector behind a backend
// agnostic trait. The network is a black box: we only pin down
// what goes in (a packed ImageBatch) and what comes out (one
// DetectionGroup of parallel arrays per image).
// ------------------------------------------------------------
// Pipeline: ImageBatch → Vec<DetectionGroup> → postprocess
// ------------------------------------------------------------
// Public API
//   * RegionDetector::detect(batch)   – one group per image
//   * postprocess(groups, batch)      – boxes back to source pixels
//   * DetectionGroup { boxes, scores, labels, masks, features }
//   * OrtRegionDetector::new(path)    – `--features ort`
// ============================================================

//! panofeat – detection layer
//!
//! [`RegionDetector`] is the seam between the feature pipeline and whatever
//! engine runs the detector. A detector is bound to one [`Device`] when it
//! is built and never renegotiates it; batches tagged for another device are
//! rejected. Detectors are expected to be in evaluation mode already.
//!
//! Detectors report boxes in the pixel frame of the image they were fed,
//! i.e. the loader's resized view (`batch.resized_sizes`). [`postprocess`]
//! maps them back onto the source image (`batch.image_sizes`) so they line
//! up with the simulator frame the angles are computed against.
//!
//! Enabling the `ort` feature adds [`OrtRegionDetector`], which runs an
//! exported ONNX graph through ONNX Runtime.

use ndarray::{Array1, Array2, Array3};
use panofeat_preprocess::{Device, ImageBatch};
use thiserror::Error;

#[cfg(feature = "ort")]
mod ort_backend;
#[cfg(feature = "ort")]
pub use ort_backend::OrtRegionDetector;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Device {requested} is unavailable: {reason}")]
    DeviceUnavailable { requested: Device, reason: String },
    #[error("Batch is on {batch} but the detector runs on {detector}")]
    DeviceMismatch { batch: Device, detector: Device },
    #[error("Detector backend error: {0}")]
    Backend(String),
    #[error("Invalid `{output}` output shape: expected {expected}, got {actual:?}")]
    OutputShape {
        output: &'static str,
        expected: &'static str,
        actual: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// Everything the detector reports for one image, as parallel arrays with
/// one row per detection, in detector output order.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionGroup {
    /// `N×4` pixel boxes `[x1, y1, x2, y2]`, in the detector's input frame
    /// until [`postprocess`] has run.
    pub boxes: Array2<f32>,
    /// `N` class probabilities.
    pub scores: Array1<f32>,
    /// `N` class ids.
    pub labels: Array1<i64>,
    /// `N×H×W` raw mask probabilities at detector resolution.
    pub masks: Array3<f32>,
    /// `N×D` region embeddings.
    pub features: Array2<f32>,
}

impl DetectionGroup {
    /// A well-typed group with no detections.
    pub fn empty(mask_height: usize, mask_width: usize, feature_dim: usize) -> Self {
        Self {
            boxes: Array2::zeros((0, 4)),
            scores: Array1::zeros(0),
            labels: Array1::zeros(0),
            masks: Array3::zeros((0, mask_height, mask_width)),
            features: Array2::zeros((0, feature_dim)),
        }
    }

    /// Detection count as reported by the box array.
    pub fn num_detections(&self) -> usize {
        self.boxes.nrows()
    }

    /// Leading length of every per-box array, boxes first.
    pub fn leading_lengths(&self) -> [(&'static str, usize); 5] {
        [
            ("boxes", self.boxes.nrows()),
            ("scores", self.scores.len()),
            ("labels", self.labels.len()),
            ("masks", self.masks.shape()[0]),
            ("features", self.features.nrows()),
        ]
    }

    /// Scale boxes from a `resized` `(height, width)` frame to `original`.
    pub fn rescale_boxes(&mut self, resized: (u32, u32), original: (u32, u32)) {
        if resized == original || self.boxes.ncols() != 4 {
            return;
        }
        let sy = original.0 as f32 / resized.0.max(1) as f32;
        let sx = original.1 as f32 / resized.1.max(1) as f32;
        for mut row in self.boxes.rows_mut() {
            row[0] *= sx;
            row[1] *= sy;
            row[2] *= sx;
            row[3] *= sy;
        }
    }
}

/// Map every group's boxes from its resized input back to the original image.
///
/// Groups pair with batch images by position; masks keep the detector's
/// resolution.
pub fn postprocess(groups: &mut [DetectionGroup], batch: &ImageBatch) {
    for ((group, &resized), &original) in groups
        .iter_mut()
        .zip(&batch.resized_sizes)
        .zip(&batch.image_sizes)
    {
        group.rescale_boxes(resized, original);
    }
}

/// Backend-agnostic region detector.
pub trait RegionDetector: Send + Sync {
    /// Device the detector was built for.
    fn device(&self) -> Device;

    /// Run on a packed batch; returns exactly one group per image, boxes in
    /// the pixels of that image's resized extent.
    fn detect(&self, batch: &ImageBatch) -> Result<Vec<DetectionGroup>>;

    /// Reject batches that were not moved to this detector's device.
    fn check_device(&self, batch: &ImageBatch) -> Result<()> {
        if batch.device != self.device() {
            return Err(DetectError::DeviceMismatch {
                batch: batch.device,
                detector: self.device(),
            });
        }
        Ok(())
    }
}

impl<T: RegionDetector + ?Sized> RegionDetector for std::sync::Arc<T> {
    fn device(&self) -> Device {
        (**self).device()
    }

    fn detect(&self, batch: &ImageBatch) -> Result<Vec<DetectionGroup>> {
        (**self).detect(batch)
    }
}
