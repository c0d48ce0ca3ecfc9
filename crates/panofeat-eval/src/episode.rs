//! One trajectory: scene setup, the policy loop, and scoring.

use log::{debug, info, warn};
use panofeat_features::FeatureExtractor;

use crate::{
    Decision, EpisodeResult, EvalConfig, EvalError, Policy, Result, TaskEnvironment, TaskRef,
    TrajectoryData,
};

/// Reset the simulator into the trajectory's starting state.
pub fn setup_scene<E: TaskEnvironment>(
    env: &mut E,
    traj: &TrajectoryData,
    repeat_idx: usize,
    reward_type: &str,
) -> Result<()> {
    let scene = &traj.scene;
    env.reset(&scene.scene_name())
        .map_err(|e| EvalError::simulator("reset", e))?;
    env.restore_scene(&scene.object_poses, &scene.object_toggles, scene.dirty_and_empty)
        .map_err(|e| EvalError::simulator("restore_scene", e))?;

    let outcome = env
        .step(&scene.init_action)
        .map_err(|e| EvalError::simulator("step", e))?;
    if !outcome.success {
        return Err(EvalError::InitActionRejected(outcome.message.unwrap_or_default()));
    }

    info!("Task: {}", traj.annotation(repeat_idx)?.task_desc);
    env.set_task(traj, repeat_idx, reward_type)
        .map_err(|e| EvalError::simulator("set_task", e))?;
    Ok(())
}

/// Run one episode to completion and score it.
///
/// Errors (simulator, feature extraction, policy) abort the episode and are
/// returned to the caller, which records the trajectory as failed.
pub fn evaluate<E: TaskEnvironment>(
    env: &mut E,
    extractor: &FeatureExtractor,
    policy: &mut dyn Policy,
    task: &TaskRef,
    traj: &TrajectoryData,
    config: &EvalConfig,
) -> Result<EpisodeResult> {
    setup_scene(env, traj, task.repeat_idx, &config.reward_type)?;
    policy.reset(traj, task.repeat_idx)?;

    let mut executed = 0;
    let mut fails = 0;
    let mut error = None;

    for step in 0..config.max_steps {
        let features = extractor.get_visual_features_and_restore(env)?;
        let action = match policy.act(step, &features)? {
            Decision::Stop => {
                debug!("policy stopped at step {}", step);
                break;
            }
            Decision::Act(action) => action,
        };

        let outcome = env
            .step(&action)
            .map_err(|e| EvalError::simulator("step", e))?;
        executed += 1;
        if !outcome.success {
            fails += 1;
            let message = outcome.message.unwrap_or_default();
            warn!("{} failed ({}/{}): {}", action.action, fails, config.max_fails, message);
            if fails >= config.max_fails {
                error = Some(format!("too many failed actions, last: {message}"));
                break;
            }
        }
    }

    let (met, total) = env.goal_conditions();
    Ok(EpisodeResult {
        task: task.task.clone(),
        repeat_idx: task.repeat_idx,
        task_id: Some(traj.task_id.clone()),
        task_type: Some(traj.task_type.clone()),
        success: error.is_none() && env.goal_satisfied(),
        goal_conditions_met: met,
        goal_conditions_total: total,
        path_len_agent: executed,
        path_len_expert: traj.expert_path_len(),
        error,
    })
}
