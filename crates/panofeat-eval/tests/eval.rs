use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use ndarray::{array, Array2, Array3};
use panofeat_camera::{Action, Environment, ObjectPose, ObjectToggle, StepOutcome, ViewFrame};
use panofeat_detect::{DetectionGroup, RegionDetector};
use panofeat_eval::{
    setup_scene, EvalConfig, EvalError, Evaluator, PolicyKind, Splits, TaskEnvironment, TaskRef,
    TrajectoryData,
};
use panofeat_features::PanoramicBoxes;
use panofeat_preprocess::{Device, ImageBatch};
use serde_json::json;

/// Counts non-rotation actions; the goal is met once the expert's
/// non-failing actions have all been executed.
#[derive(Default)]
struct Kitchen {
    heading: f32,
    needed: usize,
    done: usize,
    reward_type: String,
}

impl Environment for Kitchen {
    type Error = std::io::Error;

    fn reset(&mut self, _scene_name: &str) -> Result<(), Self::Error> {
        self.heading = 0.0;
        self.done = 0;
        Ok(())
    }

    fn restore_scene(
        &mut self,
        _poses: &[ObjectPose],
        _toggles: &[ObjectToggle],
        _dirty_and_empty: bool,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn step(&mut self, action: &Action) -> Result<StepOutcome, Self::Error> {
        let degrees = action.args.get("degrees").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
        Ok(match action.action.as_str() {
            "RotateRight" => {
                self.heading = (self.heading + degrees).rem_euclid(360.0);
                StepOutcome::ok()
            }
            "RotateLeft" => {
                self.heading = (self.heading - degrees).rem_euclid(360.0);
                StepOutcome::ok()
            }
            "Fail" => StepOutcome::rejected("blocked"),
            "Unreachable" => StepOutcome::rejected("cannot teleport there"),
            "TeleportFull" => StepOutcome::ok(),
            _ => {
                self.done += 1;
                StepOutcome::ok()
            }
        })
    }

    fn current_view(&self) -> Result<ViewFrame, Self::Error> {
        Ok(ViewFrame {
            image: RgbImage::new(32, 32),
            h_view_angle: 60.0,
            v_view_angle: 60.0,
            heading: self.heading,
            horizon: 0.0,
        })
    }
}

impl TaskEnvironment for Kitchen {
    fn set_task(
        &mut self,
        traj: &TrajectoryData,
        _repeat_idx: usize,
        reward_type: &str,
    ) -> Result<(), Self::Error> {
        self.reward_type = reward_type.to_string();
        self.needed = traj
            .plan
            .low_actions
            .iter()
            .filter(|a| a.api_action.action != "Fail")
            .count();
        Ok(())
    }

    fn goal_satisfied(&self) -> bool {
        self.needed > 0 && self.done >= self.needed
    }

    fn goal_conditions(&self) -> (usize, usize) {
        (self.done.min(self.needed), self.needed)
    }
}

fn kitchen(_worker: usize) -> Result<Kitchen, std::io::Error> {
    Ok(Kitchen::default())
}

/// One small box in every view.
struct OneBox;

impl RegionDetector for OneBox {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn detect(&self, batch: &ImageBatch) -> panofeat_detect::Result<Vec<DetectionGroup>> {
        self.check_device(batch)?;
        Ok((0..batch.len())
            .map(|_| DetectionGroup {
                boxes: array![[4.0, 4.0, 12.0, 12.0]],
                scores: array![0.9],
                labels: array![7],
                masks: Array3::from_elem((1, 8, 8), 0.7),
                features: Array2::zeros((1, 16)),
            })
            .collect())
    }
}

fn write_traj(root: &Path, task: &str, actions: &[&str], init: &str) -> anyhow::Result<()> {
    let dir = root.join(task);
    std::fs::create_dir_all(&dir)?;
    let low_actions: Vec<_> = actions
        .iter()
        .map(|a| json!({ "api_action": { "action": a } }))
        .collect();
    let traj = json!({
        "task_id": format!("trial_{}", task.replace('/', "_")),
        "task_type": "pick_and_place_simple",
        "scene": { "scene_num": 5, "init_action": { "action": init, "rotation": 0 } },
        "turk_annotations": { "anns": [{ "task_desc": format!("do {task}") }] },
        "plan": { "low_actions": low_actions }
    });
    std::fs::write(dir.join("traj_data.json"), serde_json::to_string(&traj)?)?;
    Ok(())
}

fn task(name: &str) -> TaskRef {
    TaskRef { task: name.to_string(), repeat_idx: 0 }
}

fn splits(tasks: Vec<TaskRef>) -> Splits {
    Splits::from(BTreeMap::from([("valid_seen".to_string(), tasks)]))
}

fn config(data: &Path) -> EvalConfig {
    EvalConfig {
        data: data.to_path_buf(),
        num_workers: 2,
        frame_size: 32,
        max_steps: 20,
        max_fails: 2,
        panoramic_boxes: PanoramicBoxes::uniform(4, 4),
        results_path: data.join("out").join("results.json"),
        ..Default::default()
    }
}

type KitchenFactory = fn(usize) -> Result<Kitchen, std::io::Error>;

fn evaluator(config: EvalConfig) -> anyhow::Result<Evaluator<Kitchen, KitchenFactory>> {
    Ok(Evaluator::new(config, Arc::new(OneBox), kitchen as KitchenFactory)?)
}

#[test]
fn run_scores_every_trajectory() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir()?;
    write_traj(dir.path(), "good/a", &["MoveAhead", "PickupObject"], "TeleportFull")?;
    write_traj(dir.path(), "bad/b", &["MoveAhead", "Fail", "Fail", "Fail"], "TeleportFull")?;
    write_traj(dir.path(), "stuck/c", &["MoveAhead"], "Unreachable")?;

    let eval = evaluator(config(dir.path()))?;
    let stats = eval.run_and_save(&splits(vec![
        task("good/a"),
        task("bad/b"),
        task("stuck/c"),
        task("missing/d"),
    ]))?;

    assert_eq!(stats.trials(), 4);
    assert_eq!(stats.successes.len(), 1);
    let good = &stats.successes[0];
    assert_eq!(good.task, "good/a");
    assert_eq!(good.path_len_agent, 2);
    assert_eq!(good.path_len_expert, 2);
    assert_eq!((good.goal_conditions_met, good.goal_conditions_total), (2, 2));

    let failure = |name: &str| {
        stats
            .failures
            .iter()
            .find(|r| r.task == name)
            .cloned()
            .unwrap_or_else(|| panic!("{name} should have failed"))
    };

    // gave up on the second rejected action
    let bad = failure("bad/b");
    assert_eq!(bad.path_len_agent, 3);
    assert!(bad.error.as_deref().unwrap_or_default().contains("too many failed actions"));

    let stuck = failure("stuck/c");
    assert!(stuck.error.as_deref().unwrap_or_default().contains("initial action"));
    assert_eq!(stuck.task_id, None);

    let missing = failure("missing/d");
    assert!(missing.error.is_some());

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&eval.config().results_path)?)?;
    assert_eq!(report["results"]["trials"], 4);
    assert_eq!(report["results"]["successes"], 1);
    assert_eq!(report["successes"].as_array().map(Vec::len), Some(1));
    assert_eq!(report["failures"].as_array().map(Vec::len), Some(3));
    Ok(())
}

#[test]
fn fast_epoch_and_seeded_shuffle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let all: Vec<_> = (0..20).map(|i| task(&format!("t/{i}"))).collect();
    let splits = splits(all.clone());

    let plain = evaluator(config(dir.path()))?;
    assert_eq!(plain.queue_tasks(&splits)?, all);

    let fast = evaluator(EvalConfig { fast_epoch: true, ..config(dir.path()) })?;
    assert_eq!(fast.queue_tasks(&splits)?, all[..16].to_vec());

    let shuffled = EvalConfig { shuffle: true, seed: Some(11), ..config(dir.path()) };
    let a = evaluator(shuffled.clone())?.queue_tasks(&splits)?;
    let b = evaluator(shuffled)?.queue_tasks(&splits)?;
    assert_eq!(a, b);
    assert_ne!(a, all);

    let mut sorted = a.clone();
    sorted.sort_by_key(|t| t.task.trim_start_matches("t/").parse::<usize>().unwrap_or(usize::MAX));
    assert_eq!(sorted, all);
    Ok(())
}

#[test]
fn unknown_split_and_broken_simulator_are_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_traj(dir.path(), "good/a", &["MoveAhead"], "TeleportFull")?;

    let eval = evaluator(EvalConfig { eval_split: "test".to_string(), ..config(dir.path()) })?;
    assert!(matches!(eval.run(&splits(vec![task("good/a")])), Err(EvalError::UnknownSplit(_))));

    let broken: Evaluator<Kitchen, _> = Evaluator::new(config(dir.path()), Arc::new(OneBox), |_: usize| {
        Err::<Kitchen, _>(std::io::Error::other("no display"))
    })?;
    let err = broken.run(&splits(vec![task("good/a")])).err().expect("env creation fails");
    assert!(matches!(err, EvalError::Simulator { call: "create_env", .. }));
    Ok(())
}

#[test]
fn random_walk_config_loads_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("eval.json");
    std::fs::write(
        &path,
        r#"{"eval_split": "valid_seen", "num_workers": 3, "max_steps": 5,
            "policy": {"kind": "random_walk", "seed": 1}}"#,
    )?;
    let config = EvalConfig::from_json_file(&path)?;
    assert_eq!(config.num_workers, 3);
    assert_eq!(config.policy, PolicyKind::RandomWalk { seed: 1 });

    // a random walk never stops by itself, so it runs out of steps
    write_traj(dir.path(), "good/a", &["MoveAhead", "PickupObject", "Slice"], "TeleportFull")?;
    let config = EvalConfig {
        data: dir.path().to_path_buf(),
        frame_size: 32,
        panoramic_boxes: PanoramicBoxes::uniform(2, 4),
        ..config
    };
    let stats = evaluator(config)?.run(&splits(vec![task("good/a")]))?;
    assert_eq!(stats.trials(), 1);
    let result = stats.successes.iter().chain(&stats.failures).next().cloned();
    assert_eq!(result.map(|r| r.path_len_agent), Some(5));

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, r#"{"num_workers": 0}"#)?;
    assert!(matches!(EvalConfig::from_json_file(&bad), Err(EvalError::Config(_))));
    Ok(())
}

#[test]
fn scene_setup_passes_reward_type() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_traj(dir.path(), "good/a", &["MoveAhead"], "TeleportFull")?;
    let traj = TrajectoryData::load(dir.path(), &task("good/a"))?;

    let mut env = Kitchen::default();
    setup_scene(&mut env, &traj, 0, "sparse")?;
    assert_eq!(env.reward_type, "sparse");
    assert_eq!(env.needed, 1);

    let config: EvalConfig = serde_json::from_str(r#"{"reward_type": "sparse"}"#)?;
    assert_eq!(config.reward_type, "sparse");
    Ok(())
}
