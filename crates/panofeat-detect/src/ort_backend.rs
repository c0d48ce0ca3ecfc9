// panofeat-detect/src/ort_backend.rs
//! ONNX Runtime backend for an exported Mask R-CNN graph.
//!
//! The graph takes a single `1×3×H×W` image and yields named outputs
//! `boxes`, `scores`, `labels`, `masks` and `features`. Batches are run
//! image by image, cropped to each image's resized extent, so boxes come
//! back in that extent's pixels.

use std::path::Path;
use std::sync::Mutex;

use log::{debug, info};
use ndarray::{s, Array4, ArrayView, ArrayView3, ArrayViewD, Axis, Dimension, Ix1, Ix2, Ix3};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use panofeat_preprocess::{Device, ImageBatch};

use crate::{DetectError, DetectionGroup, RegionDetector, Result};

fn backend<E: std::fmt::Display>(e: E) -> DetectError {
    DetectError::Backend(e.to_string())
}

/// Mask R-CNN exported to ONNX, run on the CPU execution provider.
pub struct OrtRegionDetector {
    // ort sessions need `&mut` to run
    session: Mutex<Session>,
    device: Device,
}

impl OrtRegionDetector {
    /// Load and optimize the ONNX model. Only `Device::Cpu` is supported;
    /// anything else fails here rather than silently falling back.
    pub fn new(model_path: impl AsRef<Path>, device: Device) -> Result<Self> {
        if device != Device::Cpu {
            return Err(DetectError::DeviceUnavailable {
                requested: device,
                reason: "built without a GPU execution provider".to_string(),
            });
        }

        let model_path = model_path.as_ref();
        info!("loading region detector from {}", model_path.display());
        let builder = Session::builder().map_err(backend)?;
        let builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(backend)?;
        let builder = builder.with_intra_threads(num_cpus::get()).map_err(backend)?;
        let session = builder.commit_from_file(model_path).map_err(backend)?;

        Ok(Self { session: Mutex::new(session), device })
    }
}

fn shaped<'a, T, D: Dimension>(
    view: &'a ArrayViewD<'a, T>,
    output: &'static str,
    expected: &'static str,
) -> Result<ArrayView<'a, T, D>> {
    view.view()
        .into_dimensionality::<D>()
        .map_err(|_| DetectError::OutputShape {
            output,
            expected,
            actual: view.shape().to_vec(),
        })
}

// torchvision exports masks as N×1×H×W
fn squeeze_masks<'a>(masks: &'a ArrayViewD<'a, f32>) -> Result<ArrayView3<'a, f32>> {
    let squeezed = if masks.ndim() == 4 && masks.shape()[1] == 1 {
        masks.index_axis(Axis(1), 0)
    } else {
        masks.view()
    };
    squeezed
        .into_dimensionality::<Ix3>()
        .map_err(|_| DetectError::OutputShape {
            output: "masks",
            expected: "[N, 1, H, W] or [N, H, W]",
            actual: masks.shape().to_vec(),
        })
}

/// `1×3×h×w` input for image `index`, padding stripped.
fn image_input(batch: &ImageBatch, index: usize) -> Array4<f32> {
    let (h, w) = batch.resized_sizes[index];
    batch
        .tensor
        .slice(s![index..index + 1, .., ..h as usize, ..w as usize])
        .to_owned()
}

impl RegionDetector for OrtRegionDetector {
    fn device(&self) -> Device {
        self.device
    }

    fn detect(&self, batch: &ImageBatch) -> Result<Vec<DetectionGroup>> {
        self.check_device(batch)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectError::Backend("session lock poisoned".to_string()))?;

        let mut groups = Vec::with_capacity(batch.len());
        for i in 0..batch.len() {
            let input = Tensor::from_array(image_input(batch, i)).map_err(backend)?;
            let outputs = session.run(ort::inputs![input]).map_err(backend)?;

            let boxes = outputs["boxes"].try_extract_array::<f32>().map_err(backend)?;
            let scores = outputs["scores"].try_extract_array::<f32>().map_err(backend)?;
            let labels = outputs["labels"].try_extract_array::<i64>().map_err(backend)?;
            let masks = outputs["masks"].try_extract_array::<f32>().map_err(backend)?;
            let features = outputs["features"].try_extract_array::<f32>().map_err(backend)?;

            let boxes = shaped::<f32, Ix2>(&boxes, "boxes", "[N, 4]")?;
            let scores = shaped::<f32, Ix1>(&scores, "scores", "[N]")?;
            let labels = shaped::<i64, Ix1>(&labels, "labels", "[N]")?;
            let features = shaped::<f32, Ix2>(&features, "features", "[N, D]")?;
            let masks = squeeze_masks(&masks)?;

            debug!("image {}: {} detections", i, boxes.nrows());
            groups.push(DetectionGroup {
                boxes: boxes.to_owned(),
                scores: scores.to_owned(),
                labels: labels.to_owned(),
                masks: masks.to_owned(),
                features: features.to_owned(),
            });
        }
        Ok(groups)
    }
}
