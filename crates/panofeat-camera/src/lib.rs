// panofeat-camera/src/lib.rs
// ============================================================
// Simulator-facing capture crate for panofeat
// Defines the environment contract the evaluation loop drives
// and the panorama capture that turns one agent position into
// an ordered set of views plus per-view camera metadata.
// ------------------------------------------------------------
// Public API:
//   * Environment            – reset / restore / step / view
//   * create_panorama(env)   – rotate & capture every view
//   * CameraInfo             – FOV + pose for one view
// ============================================================

//! panofeat – camera capture layer
//!
//! The simulator itself lives outside this workspace. This crate only
//! describes what we need from it ([`Environment`]) and how a panorama is
//! captured from it ([`create_panorama`]). Images are plain
//! [`image::RgbImage`] buffers; metadata travels alongside as
//! [`CameraInfo`], one per view, in capture order.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod panorama;
pub use panorama::{create_panorama, Panorama, PanoramaConfig};

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Simulator call `{call}` failed: {source}")]
    Simulator {
        call: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Simulator rejected `{action}` during capture: {message}")]
    ActionRejected { action: String, message: String },
    #[error("Panorama needs at least one view")]
    NoViews,
    #[error("View {index} has an empty image ({width}x{height})")]
    EmptyView { index: usize, width: u32, height: u32 },
}

impl CameraError {
    pub fn simulator<E>(call: &'static str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CameraError::Simulator { call, source: Box::new(err) }
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;

/// A simulator action: an action name plus free-form keyword arguments,
/// serialised flat (`{"action": "RotateRight", "degrees": 90}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action: String,
    #[serde(flatten)]
    pub args: Map<String, Value>,
}

impl Action {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: action.into(), args: Map::new() }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn rotate_right(degrees: f32) -> Self {
        Self::new("RotateRight").with_arg("degrees", degrees)
    }

    pub fn rotate_left(degrees: f32) -> Self {
        Self::new("RotateLeft").with_arg("degrees", degrees)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Stored pose of one scene object, replayed by `restore_scene`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPose {
    pub object_name: String,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectToggle {
    pub object_type: String,
    pub is_on: bool,
}

/// Result of a single `step`. A rejected action is not an error at this
/// level; the caller decides how many rejections an episode can absorb.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self { success: true, message: None }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()) }
    }
}

/// What the simulator reports for the agent's current view.
#[derive(Debug, Clone)]
pub struct ViewFrame {
    pub image: RgbImage,
    /// Horizontal field of view, degrees.
    pub h_view_angle: f32,
    /// Vertical field of view, degrees.
    pub v_view_angle: f32,
    /// Agent yaw in degrees, `[0, 360)`.
    pub heading: f32,
    /// Camera pitch in degrees (positive looks down).
    pub horizon: f32,
}

/// Per-view camera metadata produced by the panorama capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub view_index: usize,
    pub h_view_angle: f32,
    pub v_view_angle: f32,
    pub width: u32,
    pub height: u32,
    pub heading: f32,
    pub horizon: f32,
}

impl CameraInfo {
    pub fn from_view(view_index: usize, frame: &ViewFrame) -> Self {
        Self {
            view_index,
            h_view_angle: frame.h_view_angle,
            v_view_angle: frame.v_view_angle,
            width: frame.image.width(),
            height: frame.image.height(),
            heading: frame.heading,
            horizon: frame.horizon,
        }
    }

    /// Re-project a view-relative `(h, v)` angle pair into panorama
    /// coordinates. Heading wraps into `[0, 360)`.
    pub fn to_panorama_angles(&self, h_angle: f32, v_angle: f32) -> (f32, f32) {
        ((self.heading + h_angle).rem_euclid(360.0), self.horizon + v_angle)
    }
}

/// The simulator handle the evaluation loop drives.
///
/// Implementations wrap whatever RPC the simulator exposes. Every call is
/// blocking; there is no timeout at this layer.
pub trait Environment {
    type Error: std::error::Error + Send + Sync + 'static;

    fn reset(&mut self, scene_name: &str) -> std::result::Result<(), Self::Error>;

    fn restore_scene(
        &mut self,
        object_poses: &[ObjectPose],
        object_toggles: &[ObjectToggle],
        dirty_and_empty: bool,
    ) -> std::result::Result<(), Self::Error>;

    fn step(&mut self, action: &Action) -> std::result::Result<StepOutcome, Self::Error>;

    fn current_view(&self) -> std::result::Result<ViewFrame, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serialises_flat() {
        let a = Action::rotate_right(90.0);
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["action"], "RotateRight");
        assert_eq!(json["degrees"], 90.0);

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn panorama_angles_wrap_heading() {
        let info = CameraInfo {
            view_index: 3,
            h_view_angle: 90.0,
            v_view_angle: 90.0,
            width: 300,
            height: 300,
            heading: 350.0,
            horizon: 30.0,
        };
        let (h, v) = info.to_panorama_angles(20.0, -10.0);
        assert!((h - 10.0).abs() < 1e-4);
        assert!((v - 20.0).abs() < 1e-4);

        let (h, _) = info.to_panorama_angles(-400.0, 0.0);
        assert!((h - 310.0).abs() < 1e-4);
    }

    #[test]
    fn object_pose_uses_camel_case() {
        let pose: ObjectPose = serde_json::from_str(
            r#"{"objectName":"Apple_1","position":{"x":1.0,"y":0.5,"z":-2.0},
                "rotation":{"x":0.0,"y":90.0,"z":0.0}}"#,
        )
        .unwrap();
        assert_eq!(pose.object_name, "Apple_1");
        assert_eq!(pose.rotation.y, 90.0);
    }
}
