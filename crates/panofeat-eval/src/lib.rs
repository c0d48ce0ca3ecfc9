//! # panofeat-eval
//!
//! Replays a split of stored trajectories through a simulator, driving a
//! policy with panoramic object features, and tallies task success.
//!
//! ## Features
//!
//! - JSON configuration ([`EvalConfig`]) and split files ([`Splits`])
//! - Bounded task queue feeding a pool of worker threads, each with its own
//!   simulator and policy but one shared region detector
//! - Closed set of built-in policies selected from config ([`PolicyKind`])
//! - Success / goal-condition / path-length-weighted statistics written as JSON
//!
//! A failed trajectory (simulator error, malformed detector output, ...) is
//! recorded as a failure with its error text; the run carries on.

use panofeat_camera::{CameraError, Environment};
use panofeat_features::FeatureError;
use std::path::PathBuf;
use thiserror::Error;

pub mod config;
pub mod dataset;
pub mod episode;
pub mod policy;
pub mod runner;
pub mod stats;

pub use config::EvalConfig;
pub use dataset::{Splits, TaskRef, TrajectoryData};
pub use episode::{evaluate, setup_scene};
pub use policy::{build_policy, Decision, Policy, PolicyKind};
pub use runner::Evaluator;
pub use stats::{EpisodeResult, EvalStats, EvalSummary};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Split `{0}` not found in splits file")]
    UnknownSplit(String),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("Trajectory has no annotation #{0}")]
    MissingAnnotation(usize),
    #[error("Simulator call `{call}` failed: {source}")]
    Simulator {
        call: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Simulator rejected the initial action: {0}")]
    InitActionRejected(String),
    #[error("Policy failed: {0}")]
    Policy(String),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("Worker {0} panicked")]
    WorkerPanicked(usize),
}

impl EvalError {
    pub fn simulator<E>(call: &'static str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        EvalError::Simulator { call, source: Box::new(err) }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;

/// An [`Environment`] that also knows the task being evaluated.
pub trait TaskEnvironment: Environment {
    /// Load the goal for `traj` / annotation `repeat_idx` into the simulator,
    /// scoring progress with the named reward shaping (`"dense"`, ...).
    fn set_task(
        &mut self,
        traj: &TrajectoryData,
        repeat_idx: usize,
        reward_type: &str,
    ) -> std::result::Result<(), Self::Error>;

    fn goal_satisfied(&self) -> bool;

    /// `(met, total)` goal conditions for the current task.
    fn goal_conditions(&self) -> (usize, usize);
}
