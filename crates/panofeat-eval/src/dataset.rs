//! Split files and stored trajectories.

use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use panofeat_camera::{Action, ObjectPose, ObjectToggle};
use serde::{Deserialize, Serialize};

use crate::{EvalError, Result};

/// One evaluation unit: a trajectory directory plus which of its language
/// annotations to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub task: String,
    pub repeat_idx: usize,
}

/// `{split_name: [task, ...]}`, ordered by split name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Splits(BTreeMap<String, Vec<TaskRef>>);

impl Splits {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| EvalError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let splits: Self = serde_json::from_str(&text)?;
        for (name, tasks) in &splits.0 {
            info!("split {}: {} trajectories", name, tasks.len());
        }
        Ok(splits)
    }

    pub fn split(&self, name: &str) -> Result<&[TaskRef]> {
        self.0
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| EvalError::UnknownSplit(name.to_string()))
    }
}

impl From<BTreeMap<String, Vec<TaskRef>>> for Splits {
    fn from(map: BTreeMap<String, Vec<TaskRef>>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSetup {
    pub scene_num: u32,
    #[serde(default)]
    pub object_poses: Vec<ObjectPose>,
    #[serde(default)]
    pub object_toggles: Vec<ObjectToggle>,
    #[serde(default)]
    pub dirty_and_empty: bool,
    pub init_action: Action,
}

impl SceneSetup {
    pub fn scene_name(&self) -> String {
        format!("FloorPlan{}", self.scene_num)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotation {
    pub task_desc: String,
    #[serde(default)]
    pub high_descs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurkAnnotations {
    #[serde(default)]
    pub anns: Vec<Annotation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowAction {
    pub api_action: Action,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub low_actions: Vec<LowAction>,
}

/// The subset of a stored trajectory the evaluator needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryData {
    pub task_id: String,
    #[serde(default)]
    pub task_type: String,
    pub scene: SceneSetup,
    #[serde(default)]
    pub turk_annotations: TurkAnnotations,
    #[serde(default)]
    pub plan: Plan,
}

impl TrajectoryData {
    /// Load `<data_root>/<task>/traj_data.json`.
    pub fn load(data_root: &Path, task: &TaskRef) -> Result<Self> {
        let path = data_root.join(&task.task).join("traj_data.json");
        let text = std::fs::read_to_string(&path)
            .map_err(|source| EvalError::Io { path: path.clone(), source })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn annotation(&self, repeat_idx: usize) -> Result<&Annotation> {
        self.turk_annotations
            .anns
            .get(repeat_idx)
            .ok_or(EvalError::MissingAnnotation(repeat_idx))
    }

    /// Length of the expert demonstration, in low-level actions.
    pub fn expert_path_len(&self) -> usize {
        self.plan.low_actions.len()
    }
}
