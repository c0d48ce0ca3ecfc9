//! Policies and the config-driven factory that picks one.

use log::{debug, log_enabled, Level};
use panofeat_camera::Action;
use panofeat_features::ObjectFeatureRecord;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{Result, TrajectoryData};

/// What a policy wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act(Action),
    Stop,
}

/// A policy driven by panoramic object features.
///
/// Weights, if any, are treated as read-only during evaluation; a learned
/// model shared between workers belongs behind an `Arc` inside the impl.
pub trait Policy {
    /// Start a new episode.
    fn reset(&mut self, traj: &TrajectoryData, repeat_idx: usize) -> Result<()>;

    /// Choose the action for `step` given one record per panorama view.
    fn act(&mut self, step: usize, features: &[ObjectFeatureRecord]) -> Result<Decision>;
}

/// Built-in policies, selected by name from the evaluation config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyKind {
    /// Replays the stored expert actions, then stops.
    ExpertReplay,
    /// Uniformly random navigation; never stops on its own.
    RandomWalk { seed: u64 },
}

pub fn build_policy(kind: &PolicyKind) -> Box<dyn Policy> {
    match kind {
        PolicyKind::ExpertReplay => Box::new(ExpertReplay::default()),
        PolicyKind::RandomWalk { seed } => Box::new(RandomWalk::new(*seed)),
    }
}

#[derive(Debug, Default)]
pub struct ExpertReplay {
    actions: Vec<Action>,
}

impl Policy for ExpertReplay {
    fn reset(&mut self, traj: &TrajectoryData, _repeat_idx: usize) -> Result<()> {
        self.actions = traj
            .plan
            .low_actions
            .iter()
            .map(|a| a.api_action.clone())
            .collect();
        Ok(())
    }

    fn act(&mut self, step: usize, _features: &[ObjectFeatureRecord]) -> Result<Decision> {
        Ok(match self.actions.get(step) {
            Some(action) => Decision::Act(action.clone()),
            None => Decision::Stop,
        })
    }
}

const NAV_ACTIONS: [&str; 5] = ["MoveAhead", "RotateLeft", "RotateRight", "LookUp", "LookDown"];

pub struct RandomWalk {
    rng: StdRng,
}

impl RandomWalk {
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }
}

impl Policy for RandomWalk {
    fn reset(&mut self, _traj: &TrajectoryData, _repeat_idx: usize) -> Result<()> {
        Ok(())
    }

    fn act(&mut self, step: usize, features: &[ObjectFeatureRecord]) -> Result<Decision> {
        let name = NAV_ACTIONS[self.rng.gen_range(0..NAV_ACTIONS.len())];
        if log_enabled!(Level::Debug) {
            let bearings: Vec<f32> = features
                .iter()
                .flat_map(|r| r.panorama_angles().column(0).to_vec())
                .collect();
            debug!("step {}: objects at {:?} deg, taking {}", step, bearings, name);
        }
        Ok(Decision::Act(Action::new(name)))
    }
}
