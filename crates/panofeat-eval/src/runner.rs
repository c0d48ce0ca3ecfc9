//! Task queue + worker pool.
//!
//! A producer thread feeds a bounded channel; every worker owns a simulator
//! and a policy, shares the detector, and appends to one mutex-guarded
//! [`EvalStats`].

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::Receiver;
use log::{info, warn};
use panofeat_detect::RegionDetector;
use panofeat_features::FeatureExtractor;
use panofeat_preprocess::ImageLoader;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{
    build_policy, evaluate, EpisodeResult, EvalConfig, EvalError, EvalStats, Result, Splits,
    TaskEnvironment, TaskRef, TrajectoryData,
};

/// Trajectories kept when `fast_epoch` is set.
const FAST_EPOCH_TASKS: usize = 16;

pub struct Evaluator<E, F> {
    config: EvalConfig,
    detector: Arc<dyn RegionDetector>,
    env_factory: F,
    _env: PhantomData<fn() -> E>,
}

impl<E, F> Evaluator<E, F>
where
    E: TaskEnvironment,
    F: Fn(usize) -> std::result::Result<E, E::Error> + Sync,
{
    /// `env_factory(worker_id)` is called once on each worker thread.
    pub fn new(config: EvalConfig, detector: Arc<dyn RegionDetector>, env_factory: F) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, detector, env_factory, _env: PhantomData })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    fn extractor(&self) -> Result<FeatureExtractor> {
        Ok(FeatureExtractor::new(
            ImageLoader::with_frame_size(self.config.frame_size),
            Arc::clone(&self.detector),
            self.config.panoramic_boxes.clone(),
            self.config.device,
            self.config.panorama,
        )?)
    }

    /// Tasks of the configured split, in evaluation order.
    pub fn queue_tasks(&self, splits: &Splits) -> Result<Vec<TaskRef>> {
        let mut tasks = splits.split(&self.config.eval_split)?.to_vec();
        if self.config.fast_epoch {
            tasks.truncate(FAST_EPOCH_TASKS);
        }
        if self.config.shuffle {
            let seed = self.config.seed.unwrap_or_else(|| {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default()
            });
            tasks.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        Ok(tasks)
    }

    /// Evaluate every queued task across `num_workers` threads.
    ///
    /// Per-trajectory failures land in the stats; only worker start-up
    /// problems (simulator creation, device, config) are returned as errors.
    pub fn run(&self, splits: &Splits) -> Result<EvalStats> {
        let tasks = self.queue_tasks(splits)?;
        // fail fast on device / cap table problems before spawning anything
        self.extractor()?;

        let workers = self.config.num_workers;
        info!(
            "evaluating {} trajectories of `{}` on {} workers",
            tasks.len(),
            self.config.eval_split,
            workers
        );

        let stats = Mutex::new(EvalStats::default());
        let (tx, rx) = crossbeam_channel::bounded::<TaskRef>(workers * 2);

        let outcomes = std::thread::scope(|scope| {
            scope.spawn(move || {
                for task in tasks {
                    if tx.send(task).is_err() {
                        break; // every worker is gone
                    }
                }
            });

            let handles: Vec<_> = (0..workers)
                .map(|id| {
                    let rx = rx.clone();
                    let stats = &stats;
                    scope.spawn(move || self.worker(id, rx, stats))
                })
                .collect();
            drop(rx);

            handles
                .into_iter()
                .enumerate()
                .map(|(id, h)| h.join().unwrap_or(Err(EvalError::WorkerPanicked(id))))
                .collect::<Vec<_>>()
        });

        let stats = stats.into_inner().unwrap_or_else(|p| p.into_inner());
        for outcome in outcomes {
            outcome?;
        }

        let summary = stats.summary();
        info!(
            "SR: {}/{} = {:.3}, GC: {:.3}, PLW SR: {:.3}",
            summary.successes,
            summary.trials,
            summary.success_rate,
            summary.goal_condition_success_rate,
            summary.path_len_weighted_success_rate
        );
        Ok(stats)
    }

    /// [`run`](Self::run), then write the report to `config.results_path`.
    pub fn run_and_save(&self, splits: &Splits) -> Result<EvalStats> {
        let stats = self.run(splits)?;
        stats.save_results(&self.config.results_path)?;
        info!("saved results to {}", self.config.results_path.display());
        Ok(stats)
    }

    fn worker(&self, id: usize, rx: Receiver<TaskRef>, stats: &Mutex<EvalStats>) -> Result<()> {
        let mut env = (self.env_factory)(id).map_err(|e| EvalError::simulator("create_env", e))?;
        let extractor = self.extractor()?;
        let mut policy = build_policy(&self.config.policy);

        for task in rx.iter() {
            let result = TrajectoryData::load(&self.config.data, &task).and_then(|traj| {
                evaluate(&mut env, &extractor, policy.as_mut(), &task, &traj, &self.config)
            });
            let result = result.unwrap_or_else(|e| {
                warn!("worker {}: {} #{} failed: {}", id, task.task, task.repeat_idx, e);
                EpisodeResult::errored(&task, &e)
            });

            let mut stats = stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.record(result);
            info!(
                "worker {}: {}/{} successful so far",
                id,
                stats.successes.len(),
                stats.trials()
            );
        }
        Ok(())
    }
}
