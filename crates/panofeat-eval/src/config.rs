//! Evaluation run configuration.

use std::path::{Path, PathBuf};

use panofeat_camera::PanoramaConfig;
use panofeat_features::PanoramicBoxes;
use panofeat_preprocess::Device;
use serde::{Deserialize, Serialize};

use crate::{EvalError, PolicyKind, Result};

/// Configuration for an evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Splits file: `{split_name: [{task, repeat_idx}, ...]}`
    pub splits: PathBuf,
    /// Root directory holding `<task>/traj_data.json`
    pub data: PathBuf,
    /// Split to evaluate
    pub eval_split: String,
    /// Number of worker threads
    pub num_workers: usize,
    /// Only evaluate the first 16 trajectories
    pub fast_epoch: bool,
    /// Shuffle the task order
    pub shuffle: bool,
    /// Shuffle seed; wall clock if unset
    pub seed: Option<u64>,
    /// Object cap per panorama view
    pub panoramic_boxes: PanoramicBoxes,
    pub panorama: PanoramaConfig,
    /// Square frame size the image loader scales views to
    pub frame_size: u32,
    pub device: Device,
    /// Policy steps per episode
    pub max_steps: usize,
    /// Rejected simulator actions before an episode is abandoned
    pub max_fails: usize,
    pub policy: PolicyKind,
    /// Reward shaping handed to the simulator's task setup
    pub reward_type: String,
    /// Where `save_results` writes the JSON report
    pub results_path: PathBuf,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let panorama = PanoramaConfig::default();
        Self {
            splits: PathBuf::from("./data/splits/oct21.json"),
            data: PathBuf::from("./data/json_2.1.0"),
            eval_split: "valid_seen".to_string(),
            num_workers: 1,
            fast_epoch: false,
            shuffle: false,
            seed: None,
            panoramic_boxes: PanoramicBoxes::uniform(18, panorama.num_views),
            panorama,
            frame_size: 300,
            device: Device::Cpu,
            max_steps: 1000,
            max_fails: 10,
            policy: PolicyKind::ExpertReplay,
            reward_type: "dense".to_string(),
            results_path: PathBuf::from("./results/task_results.json"),
        }
    }
}

impl EvalConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(EvalError::Config("num_workers must be at least 1".to_string()));
        }
        if self.max_steps == 0 {
            return Err(EvalError::Config("max_steps must be at least 1".to_string()));
        }
        if self.frame_size == 0 {
            return Err(EvalError::Config("frame_size must be positive".to_string()));
        }
        if self.panoramic_boxes.len() < self.panorama.num_views {
            return Err(EvalError::Config(format!(
                "panoramic_boxes has {} entries for {} views",
                self.panoramic_boxes.len(),
                self.panorama.num_views
            )));
        }
        Ok(())
    }
}
