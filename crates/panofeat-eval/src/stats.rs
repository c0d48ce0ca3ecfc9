//! Per-episode results and the run-level tally.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EvalError, Result, TaskRef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub task: String,
    pub repeat_idx: usize,
    pub task_id: Option<String>,
    pub task_type: Option<String>,
    pub success: bool,
    pub goal_conditions_met: usize,
    pub goal_conditions_total: usize,
    /// Actions the agent actually executed.
    pub path_len_agent: usize,
    pub path_len_expert: usize,
    /// Why the episode ended early, if it did.
    pub error: Option<String>,
}

impl EpisodeResult {
    /// A trajectory that could not be evaluated at all.
    pub fn errored(task: &TaskRef, error: &EvalError) -> Self {
        Self {
            task: task.task.clone(),
            repeat_idx: task.repeat_idx,
            task_id: None,
            task_type: None,
            success: false,
            goal_conditions_met: 0,
            goal_conditions_total: 0,
            path_len_agent: 0,
            path_len_expert: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn goal_condition_rate(&self) -> f64 {
        if self.goal_conditions_total == 0 {
            return 0.0;
        }
        self.goal_conditions_met as f64 / self.goal_conditions_total as f64
    }

    /// Expert length over the longer of agent and expert lengths.
    pub fn path_len_weight(&self) -> f64 {
        let longest = self.path_len_agent.max(self.path_len_expert);
        if longest == 0 {
            return 0.0;
        }
        self.path_len_expert as f64 / longest as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub trials: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub goal_condition_success_rate: f64,
    pub path_len_weighted_success_rate: f64,
    pub path_len_weighted_goal_condition_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalStats {
    pub successes: Vec<EpisodeResult>,
    pub failures: Vec<EpisodeResult>,
}

impl EvalStats {
    pub fn record(&mut self, result: EpisodeResult) {
        if result.success {
            self.successes.push(result);
        } else {
            self.failures.push(result);
        }
    }

    pub fn trials(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn summary(&self) -> EvalSummary {
        let trials = self.trials();
        if trials == 0 {
            return EvalSummary::default();
        }
        let all = self.successes.iter().chain(&self.failures);
        let n = trials as f64;

        let mut gc = 0.0;
        let mut plw_s = 0.0;
        let mut plw_gc = 0.0;
        for r in all {
            let weight = r.path_len_weight();
            gc += r.goal_condition_rate();
            plw_gc += r.goal_condition_rate() * weight;
            if r.success {
                plw_s += weight;
            }
        }

        EvalSummary {
            trials,
            successes: self.successes.len(),
            success_rate: self.successes.len() as f64 / n,
            goal_condition_success_rate: gc / n,
            path_len_weighted_success_rate: plw_s / n,
            path_len_weighted_goal_condition_rate: plw_gc / n,
        }
    }

    /// Write `{successes, failures, results}` as pretty JSON, creating the
    /// parent directory if needed.
    pub fn save_results(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Report<'a> {
            successes: &'a [EpisodeResult],
            failures: &'a [EpisodeResult],
            results: EvalSummary,
        }

        let io_err = |source| EvalError::Io { path: path.to_path_buf(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let report = Report {
            successes: &self.successes,
            failures: &self.failures,
            results: self.summary(),
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).map_err(io_err)?;
        Ok(())
    }
}
