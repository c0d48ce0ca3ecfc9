//! # panofeat-features
//!
//! Turns the agent's current viewpoint into the per-object representation the
//! policy consumes. One call captures a panorama, packs it, runs the region
//! detector once on the whole batch and assembles one
//! [`ObjectFeatureRecord`] per view.
//!
//! ## Stages
//!
//! - [`calculate_angles`]: pixel centers → angular offsets from the optical center
//! - [`assemble_view`]: box centers, angles, per-view cap, mask binarization
//! - [`FeatureExtractor::get_visual_features`]: the full capture → detect → assemble run
//! - [`ObjectFeatureRecord::panorama_angles`]: per-view angles as panorama bearings
//!
//! Everything here is synchronous and holds no shared mutable state; run one
//! extractor per worker, sharing the detector behind an `Arc`.

use panofeat_camera::CameraError;
use panofeat_detect::DetectError;
use panofeat_preprocess::PreprocessError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod assemble;
pub mod collect;
pub mod geometry;

pub use assemble::{assemble_view, ObjectFeatureRecord, MASK_THRESHOLD};
pub use collect::FeatureExtractor;
pub use geometry::calculate_angles;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("View {view}: `{field}` has {actual} rows but the detector reported {expected} boxes")]
    DetectionShape {
        view: usize,
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("View {view}: boxes must have 4 columns, got {actual}")]
    BoxColumns { view: usize, actual: usize },
    #[error("Cap table has {caps} entries but the panorama has {views} views")]
    CapTable { caps: usize, views: usize },
    #[error("Detector returned {groups} groups for {views} views")]
    GroupCount { groups: usize, views: usize },
    #[error("Invalid angle input: {0}")]
    AngleInput(String),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Detect(#[from] DetectError),
}

pub type Result<T> = std::result::Result<T, FeatureError>;

/// Per-view object caps, indexed by position within the panorama.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PanoramicBoxes(Vec<usize>);

impl PanoramicBoxes {
    pub fn new(caps: Vec<usize>) -> Self {
        Self(caps)
    }

    /// Same cap for every one of `num_views` views.
    pub fn uniform(cap: usize, num_views: usize) -> Self {
        Self(vec![cap; num_views])
    }

    pub fn cap(&self, position: usize) -> Option<usize> {
        self.0.get(position).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<usize>> for PanoramicBoxes {
    fn from(caps: Vec<usize>) -> Self {
        Self(caps)
    }
}
