// panofeat-camera/src/panorama.rs
use crate::{Action, CameraError, CameraInfo, Environment, Result};
use image::RgbImage;
use log::debug;
use serde::{Deserialize, Serialize};

/// How a panorama is swept: `num_views` captures, `rotation_degrees` apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanoramaConfig {
    pub num_views: usize,
    pub rotation_degrees: f32,
}

impl Default for PanoramaConfig {
    // four 90° views cover 360° at the simulator's default 90° FOV
    fn default() -> Self {
        Self { num_views: 4, rotation_degrees: 90.0 }
    }
}

/// Captured views in increasing view-index order, with parallel metadata.
#[derive(Debug, Clone)]
pub struct Panorama {
    pub images: Vec<RgbImage>,
    pub camera_infos: Vec<CameraInfo>,
    rotations: usize,
    rotation_degrees: f32,
}

impl Panorama {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Undo the rotations performed during capture.
    ///
    /// Capture leaves the agent facing the last view; callers that need the
    /// original heading back must call this explicitly.
    pub fn restore_orientation<E: Environment>(&self, env: &mut E) -> Result<()> {
        if self.rotations == 0 {
            return Ok(());
        }
        let action = Action::rotate_left(self.rotation_degrees * self.rotations as f32);
        let outcome = env
            .step(&action)
            .map_err(|e| CameraError::simulator("step", e))?;
        if !outcome.success {
            return Err(CameraError::ActionRejected {
                action: action.action,
                message: outcome.message.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Sweep the agent through a full panorama starting at `start_view`.
///
/// The first view is captured at the current orientation; every later view
/// is preceded by one `RotateRight` of `config.rotation_degrees`.
pub fn create_panorama<E: Environment>(
    env: &mut E,
    start_view: usize,
    config: &PanoramaConfig,
) -> Result<Panorama> {
    if config.num_views == 0 {
        return Err(CameraError::NoViews);
    }

    let mut images = Vec::with_capacity(config.num_views);
    let mut camera_infos = Vec::with_capacity(config.num_views);
    let mut rotations = 0;

    for index in start_view..start_view + config.num_views {
        if index > start_view {
            let action = Action::rotate_right(config.rotation_degrees);
            let outcome = env
                .step(&action)
                .map_err(|e| CameraError::simulator("step", e))?;
            if !outcome.success {
                return Err(CameraError::ActionRejected {
                    action: action.action,
                    message: outcome.message.unwrap_or_default(),
                });
            }
            rotations += 1;
        }

        let frame = env
            .current_view()
            .map_err(|e| CameraError::simulator("current_view", e))?;
        let (width, height) = frame.image.dimensions();
        if width == 0 || height == 0 {
            return Err(CameraError::EmptyView { index, width, height });
        }

        let info = CameraInfo::from_view(index, &frame);
        debug!(
            "captured view {} ({}x{}) heading {:.1} horizon {:.1}",
            index, width, height, info.heading, info.horizon
        );
        camera_infos.push(info);
        images.push(frame.image);
    }

    Ok(Panorama {
        images,
        camera_infos,
        rotations,
        rotation_degrees: config.rotation_degrees,
    })
}
