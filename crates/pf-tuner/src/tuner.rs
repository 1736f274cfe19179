//! Auto-tuner: a prioritized, bounded worker pool of optimization tasks.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use pf_data::{AlgorithmCatalog, DatasetProvider};
use pf_optimizer::{
    panic_message, OptimizationConfig, OptimizationResult, Optimizer, ProgressFn, RunControl,
};
use pf_types::{OptimizationError, OptimizationMethod, PfError, PfResult, TuningError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::events::{EventBus, TunerEvent};
use crate::report::{TaskOutcome, TuningReport};
use crate::task::{TaskId, TaskQueue, TaskStatus, TuningTask};

/// Auto-tuner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerConfig {
    /// Tasks optimized concurrently.
    pub max_workers: usize,
    /// Test datasets requested per task.
    pub datasets_per_task: usize,
    /// Strategy used by smart optimization.
    pub default_method: OptimizationMethod,
    /// Iteration budget smart optimization scales from.
    pub default_iterations: usize,
    /// Activate a new best version automatically when it improves enough.
    pub auto_activate: bool,
    /// Minimum improvement (percent) for automatic activation.
    pub auto_activate_threshold: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            datasets_per_task: 5,
            default_method: OptimizationMethod::Genetic,
            default_iterations: 50,
            auto_activate: false,
            auto_activate_threshold: 5.0,
        }
    }
}

impl TunerConfig {
    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    pub fn with_datasets_per_task(mut self, n: usize) -> Self {
        self.datasets_per_task = n;
        self
    }

    pub fn with_default_method(mut self, method: OptimizationMethod, iterations: usize) -> Self {
        self.default_method = method;
        self.default_iterations = iterations;
        self
    }

    pub fn with_auto_activate(mut self, threshold_pct: f64) -> Self {
        self.auto_activate = true;
        self.auto_activate_threshold = threshold_pct;
        self
    }
}

/// Task counts by state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TunerStatus {
    pub active_count: usize,
    pub queued_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
}

#[derive(Debug, Default)]
struct TunerState {
    queue: Mutex<TaskQueue>,
    running: Mutex<HashMap<TaskId, TuningTask>>,
    finished: Mutex<Vec<TuningTask>>,
    events: EventBus,
}

impl TunerState {
    fn set_progress(&self, task_id: &str, progress: f64) {
        if let Some(task) = self.running.lock().get_mut(task_id) {
            task.progress = progress;
        }
        self.events.emit(TunerEvent::Progress {
            task_id: task_id.to_string(),
            progress,
        });
    }
}

/// Everything a worker needs to run one task off the async runtime.
struct Job {
    task_id: TaskId,
    algorithm_key: String,
    config: OptimizationConfig,
    optimizer: Optimizer,
    provider: Arc<dyn DatasetProvider>,
    datasets_per_task: usize,
    control: RunControl,
}

impl Job {
    fn run(&self) -> PfResult<OptimizationResult> {
        let baseline = self
            .optimizer
            .store()
            .catalog()
            .get(&self.algorithm_key)
            .ok_or_else(|| OptimizationError::AlgorithmNotFound {
                algorithm_key: self.algorithm_key.clone(),
            })?;
        let datasets = self
            .provider
            .create_test_datasets(&self.algorithm_key, self.datasets_per_task)?;
        self.optimizer
            .optimize(&baseline, &self.config, &datasets, &self.control)
    }

    /// Run the task, turning a panic into a task failure.
    fn execute(self) -> (TaskId, PfResult<OptimizationResult>) {
        let result = catch_unwind(AssertUnwindSafe(|| self.run())).unwrap_or_else(|payload| {
            Err(TuningError::TaskPanicked {
                task_id: self.task_id.clone(),
                message: panic_message(payload.as_ref()),
            }
            .into())
        });
        (self.task_id, result)
    }
}

/// Schedules optimization tasks over a bounded pool of blocking workers.
#[derive(Debug)]
pub struct AutoTuner {
    optimizer: Optimizer,
    provider: Arc<dyn DatasetProvider>,
    config: TunerConfig,
    state: Arc<TunerState>,
    stop: Arc<AtomicBool>,
}

impl AutoTuner {
    pub fn new(optimizer: Optimizer, provider: Arc<dyn DatasetProvider>, config: TunerConfig) -> Self {
        Self {
            optimizer,
            provider,
            config,
            state: Arc::new(TunerState::default()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn catalog(&self) -> &Arc<dyn AlgorithmCatalog> {
        self.optimizer.store().catalog()
    }

    /// Receive every [`TunerEvent`] emitted from now on.
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<TunerEvent> {
        self.state.events.subscribe()
    }

    /// Queue a task and return its id.
    pub fn add_task(&self, task: TuningTask) -> TaskId {
        let id = task.id.clone();
        info!(
            task = %id,
            algorithm = %task.algorithm_key,
            priority = task.priority,
            method = %task.config.method,
            "task queued"
        );
        self.state.events.emit(TunerEvent::Queued {
            task_id: id.clone(),
            algorithm_key: task.algorithm_key.clone(),
            priority: task.priority,
        });
        self.state.queue.lock().push(task);
        id
    }

    /// Cancel a pending task. Returns `Ok(false)` for a task that is already
    /// running or finished, which is left alone.
    pub fn cancel_task(&self, task_id: &str) -> PfResult<bool> {
        let mut queue = self.state.queue.lock();
        let Some(mut task) = queue.remove(task_id) else {
            let known = self.state.running.lock().contains_key(task_id)
                || self.state.finished.lock().iter().any(|t| t.id == task_id);
            return if known {
                Ok(false)
            } else {
                Err(TuningError::TaskNotFound {
                    task_id: task_id.to_string(),
                }
                .into())
            };
        };
        task.mark_cancelled();
        info!(task = task_id, algorithm = %task.algorithm_key, "task cancelled");
        self.state.events.emit(TunerEvent::Cancelled {
            task_id: task.id.clone(),
            algorithm_key: task.algorithm_key.clone(),
        });
        self.state.finished.lock().push(task);
        Ok(true)
    }

    /// Ask running strategies to finish with their best-so-far and stop
    /// starting new tasks. Cleared when the next batch starts.
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            info!("stop requested");
            self.state.events.emit(TunerEvent::StopRequested);
        }
    }

    pub fn get_status(&self) -> TunerStatus {
        let queued_count = self.state.queue.lock().len();
        let active_count = self.state.running.lock().len();
        let finished = self.state.finished.lock();
        let count = |status: TaskStatus| finished.iter().filter(|t| t.status == status).count();
        TunerStatus {
            active_count,
            queued_count,
            completed_count: count(TaskStatus::Completed),
            failed_count: count(TaskStatus::Failed),
            cancelled_count: count(TaskStatus::Cancelled),
        }
    }

    /// Every known task: queued (in run order), running, then finished.
    pub fn tasks(&self) -> Vec<TuningTask> {
        let mut all = self.state.queue.lock().snapshot();
        all.extend(self.state.running.lock().values().cloned());
        all.extend(self.state.finished.lock().iter().cloned());
        all
    }

    pub fn get_task(&self, task_id: &str) -> Option<TuningTask> {
        self.tasks().into_iter().find(|t| t.id == task_id)
    }

    /// Run queued tasks until the queue is empty or a stop is requested.
    ///
    /// At most `max_workers` tasks run at once; a slot is refilled, in
    /// priority order, as soon as a task finishes. A failing or panicking
    /// task only fails itself.
    pub async fn run_batch(&self) -> Vec<TaskOutcome> {
        self.stop.store(false, Ordering::SeqCst);
        let workers = self.config.max_workers.max(1);
        let mut set: JoinSet<(TaskId, PfResult<OptimizationResult>)> = JoinSet::new();
        let mut outcomes = Vec::new();

        loop {
            while set.len() < workers && !self.stop.load(Ordering::SeqCst) {
                // popped and marked running under the queue lock so the task
                // is always visible to `cancel_task`
                let mut queue = self.state.queue.lock();
                let Some(task) = queue.pop() else {
                    break;
                };
                let job = self.start(task);
                drop(queue);
                set.spawn_blocking(move || job.execute());
            }

            let Some(joined) = set.join_next().await else {
                break;
            };
            match joined {
                Ok((task_id, result)) => {
                    if let Some(outcome) = self.finish(&task_id, result) {
                        outcomes.push(outcome);
                    }
                }
                Err(e) => error!("worker join failed: {}", e),
            }
        }

        info!(
            finished = outcomes.len(),
            queued = self.state.queue.lock().len(),
            "batch finished"
        );
        outcomes
    }

    fn start(&self, mut task: TuningTask) -> Job {
        task.mark_running();
        info!(task = %task.id, algorithm = %task.algorithm_key, "task started");
        self.state.events.emit(TunerEvent::Started {
            task_id: task.id.clone(),
            algorithm_key: task.algorithm_key.clone(),
        });

        let state = self.state.clone();
        let progress_id = task.id.clone();
        let progress: Arc<ProgressFn> = Arc::new(move |p: f64| state.set_progress(&progress_id, p));

        let job = Job {
            task_id: task.id.clone(),
            algorithm_key: task.algorithm_key.clone(),
            config: task.config.clone(),
            optimizer: self.optimizer.clone(),
            provider: self.provider.clone(),
            datasets_per_task: self.config.datasets_per_task,
            control: RunControl::default()
                .with_stop_flag(self.stop.clone())
                .with_progress(progress),
        };
        self.state.running.lock().insert(task.id.clone(), task);
        job
    }

    fn finish(&self, task_id: &str, result: PfResult<OptimizationResult>) -> Option<TaskOutcome> {
        let Some(mut task) = self.state.running.lock().get(task_id).cloned() else {
            warn!(task = task_id, "finished task was not tracked as running");
            return None;
        };

        let mut activated = false;
        match result {
            Ok(result) => {
                activated = self.maybe_activate(&task.algorithm_key, &result);
                info!(
                    task = task_id,
                    algorithm = %task.algorithm_key,
                    improvement = result.improvement_percentage,
                    version = ?result.best_version_id,
                    "task completed"
                );
                self.state.events.emit(TunerEvent::Completed {
                    task_id: task_id.to_string(),
                    algorithm_key: task.algorithm_key.clone(),
                    improvement_percentage: result.improvement_percentage,
                    best_version_id: result.best_version_id,
                });
                task.mark_completed(result);
            }
            Err(e) => {
                warn!(task = task_id, algorithm = %task.algorithm_key, "task failed: {}", e);
                self.state.events.emit(TunerEvent::Failed {
                    task_id: task_id.to_string(),
                    algorithm_key: task.algorithm_key.clone(),
                    error: e.to_string(),
                });
                task.mark_failed(e.to_string());
            }
        }

        let outcome = TaskOutcome::from_task(&task, activated);
        let mut running = self.state.running.lock();
        running.remove(task_id);
        self.state.finished.lock().push(task);
        Some(outcome)
    }

    fn maybe_activate(&self, algorithm_key: &str, result: &OptimizationResult) -> bool {
        if !self.config.auto_activate {
            return false;
        }
        let Some(version_id) = result.best_version_id else {
            return false;
        };
        if result.improvement_percentage < self.config.auto_activate_threshold {
            return false;
        }
        if self.optimizer.store().activate_version(version_id) {
            info!(algorithm = algorithm_key, version_id, "auto-activated new best version");
            self.state.events.emit(TunerEvent::Activated {
                algorithm_key: algorithm_key.to_string(),
                version_id,
            });
            true
        } else {
            false
        }
    }

    /// Optimize `keys` (every active algorithm when `None`) with one method.
    pub async fn one_click_optimize(
        &self,
        keys: Option<Vec<String>>,
        method: OptimizationMethod,
        max_iterations: usize,
    ) -> PfResult<TuningReport> {
        let started = Utc::now();
        let config = OptimizationConfig::new(method).with_max_iterations(max_iterations);
        config.validate()?;

        let keys = match keys {
            Some(keys) => keys,
            None => self
                .catalog()
                .list_active()
                .into_iter()
                .map(|c| c.english_name)
                .collect(),
        };
        info!(algorithms = keys.len(), method = %method, max_iterations, "one-click optimization");

        for (i, key) in keys.iter().enumerate() {
            self.add_task(TuningTask::new(key, i as i32, config.clone()));
        }
        let outcomes = self.run_batch().await;
        Ok(TuningReport::from_outcomes(outcomes, started))
    }

    /// Optimize every active algorithm scoring below `performance_threshold`,
    /// worst first and with more effort the worse it scores.
    ///
    /// `improvement_target` is the relative gain (0.1 = 10%) each run aims
    /// for. Nothing is queued when every algorithm meets the threshold.
    pub async fn smart_optimize(
        &self,
        performance_threshold: f64,
        improvement_target: f64,
    ) -> PfResult<TuningReport> {
        let started = Utc::now();
        let scores = self.current_scores().await?;

        let mut below: Vec<(String, f64)> = scores
            .iter()
            .filter(|(_, score)| **score < performance_threshold)
            .map(|(k, s)| (k.clone(), *s))
            .collect();

        if below.is_empty() {
            info!(threshold = performance_threshold, "all algorithms meet the threshold");
            return Ok(TuningReport::no_optimization_needed(scores, performance_threshold));
        }

        below.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (key, score)) in below.iter().enumerate() {
            let config = self.intensity_config(*score, performance_threshold, improvement_target);
            info!(
                algorithm = %key,
                score,
                iterations = config.max_iterations,
                "queueing underperforming algorithm"
            );
            self.add_task(TuningTask::new(key, rank as i32, config));
        }

        let outcomes = self.run_batch().await;
        Ok(TuningReport::from_outcomes(outcomes, started).with_current_scores(scores))
    }

    /// Overall score of every active algorithm with its live parameters.
    pub async fn current_scores(&self) -> PfResult<BTreeMap<String, f64>> {
        let catalog = self.catalog().clone();
        let evaluator = self.optimizer.evaluator().clone();
        let provider = self.provider.clone();
        let count = self.config.datasets_per_task;

        tokio::task::spawn_blocking(move || {
            let mut scores = BTreeMap::new();
            for config in catalog.list_active() {
                let datasets = match provider.create_test_datasets(config.key(), count) {
                    Ok(datasets) => datasets,
                    Err(e) => {
                        warn!(algorithm = config.key(), "no datasets, skipping score: {}", e);
                        continue;
                    }
                };
                let metrics = evaluator.evaluate(config.key(), &config.parameters, &datasets);
                scores.insert(config.english_name.clone(), metrics.overall_score);
            }
            Ok::<_, PfError>(scores)
        })
        .await
        .map_err(|e| TuningError::WorkerPool {
            message: e.to_string(),
        })?
    }

    /// Search effort grows as `score` falls further below `threshold`.
    fn intensity_config(&self, score: f64, threshold: f64, target: f64) -> OptimizationConfig {
        let severity = if threshold > 0.0 {
            (1.0 - score / threshold).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let defaults = OptimizationConfig::default();
        OptimizationConfig {
            method: self.config.default_method,
            max_iterations: ((self.config.default_iterations as f64) * (1.0 + 2.0 * severity))
                .round()
                .max(1.0) as usize,
            population_size: defaults.population_size + (20.0 * severity).round() as usize,
            timeout_minutes: ((defaults.timeout_minutes as f64) * (1.0 + severity)).round() as u64,
            min_improvement: (score * target).max(0.001),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_data::{InMemoryCatalog, PatternRecognizer, SyntheticDatasetProvider};
    use pf_optimizer::{EvaluatorConfig, PerformanceEvaluator};
    use pf_store::VersionStore;
    use pf_types::{Detection, EvaluationError, Parameters, ParamValue, Signal, Timeseries};
    use crate::report::ReportStatus;

    /// Confidence peaks when `threshold` is 0.8
    #[derive(Debug)]
    struct PeakRecognizer;

    impl PatternRecognizer for PeakRecognizer {
        fn supports(&self, _: &str) -> bool {
            true
        }

        fn recognize(&self, _: &str, parameters: &Parameters, series: &Timeseries) -> PfResult<Vec<Detection>> {
            let threshold = parameters.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.5);
            let candle = &series.candles[0];
            Ok(vec![Detection {
                index: 0,
                timestamp: candle.timestamp,
                price: candle.close,
                confidence: (1.0 - (threshold - 0.8).abs()).clamp(0.0, 1.0),
                signal: Signal::Buy,
            }])
        }

        fn name(&self) -> &str {
            "peak"
        }
    }

    #[derive(Debug)]
    struct PanickyProvider {
        inner: SyntheticDatasetProvider,
        panic_for: &'static str,
    }

    impl DatasetProvider for PanickyProvider {
        fn create_test_datasets(&self, algorithm_key: &str, count: usize) -> PfResult<Vec<Timeseries>> {
            if algorithm_key == self.panic_for {
                panic!("data source for {algorithm_key} exploded");
            }
            self.inner.create_test_datasets(algorithm_key, count)
        }

        fn name(&self) -> &str {
            "panicky"
        }
    }

    fn provider(panic_for: &'static str) -> Arc<dyn DatasetProvider> {
        Arc::new(PanickyProvider {
            inner: SyntheticDatasetProvider::new(9).with_length(30),
            panic_for,
        })
    }

    /// Returns an error instead of datasets for one algorithm
    #[derive(Debug)]
    struct FailingProvider {
        inner: SyntheticDatasetProvider,
        fail_for: &'static str,
    }

    impl DatasetProvider for FailingProvider {
        fn create_test_datasets(&self, algorithm_key: &str, count: usize) -> PfResult<Vec<Timeseries>> {
            if algorithm_key == self.fail_for {
                return Err(EvaluationError::DatasetUnavailable {
                    message: format!("no candles for {algorithm_key}"),
                }
                .into());
            }
            self.inner.create_test_datasets(algorithm_key, count)
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn tuner_with(config: TunerConfig, panic_for: &'static str) -> (AutoTuner, Arc<InMemoryCatalog>) {
        tuner_over(config, provider(panic_for))
    }

    fn tuner_over(
        config: TunerConfig,
        provider: Arc<dyn DatasetProvider>,
    ) -> (AutoTuner, Arc<InMemoryCatalog>) {
        let catalog = Arc::new(InMemoryCatalog::with_defaults());
        let store = VersionStore::in_memory(catalog.clone()).unwrap();
        let evaluator = PerformanceEvaluator::with_config(
            Arc::new(PeakRecognizer),
            EvaluatorConfig::default().without_resource_sampling().without_sensitivity(),
        );
        let optimizer = Optimizer::new(Arc::new(store), Arc::new(evaluator));
        (AutoTuner::new(optimizer, provider, config.with_datasets_per_task(3)), catalog)
    }

    fn tuner(workers: usize) -> AutoTuner {
        tuner_with(TunerConfig::default().with_max_workers(workers), "").0
    }

    fn quick(iterations: usize) -> OptimizationConfig {
        OptimizationConfig::new(OptimizationMethod::Random).with_max_iterations(iterations)
    }

    fn set_threshold(catalog: &InMemoryCatalog, key: &str, threshold: f64) {
        let mut config = catalog.get(key).unwrap();
        config.parameters.insert("threshold".to_string(), ParamValue::Float(threshold));
        catalog.upsert(config);
    }

    #[tokio::test]
    async fn tasks_run_in_priority_order() {
        let tuner = tuner(1);
        tuner.add_task(TuningTask::new("doji", 3, quick(2)));
        tuner.add_task(TuningTask::new("hammer", 1, quick(2)));
        tuner.add_task(TuningTask::new("shooting_star", 2, quick(2)));
        tuner.add_task(TuningTask::new("bullish_engulfing", 1, quick(2)));

        let outcomes = tuner.run_batch().await;
        let order: Vec<&str> = outcomes.iter().map(|o| o.algorithm_key.as_str()).collect();
        assert_eq!(order, vec!["hammer", "bullish_engulfing", "shooting_star", "doji"]);
        assert!(outcomes.iter().all(|o| o.succeeded()));

        let status = tuner.get_status();
        assert_eq!(status.completed_count, 4);
        assert_eq!(status.queued_count, 0);
        assert_eq!(status.active_count, 0);
    }

    #[tokio::test]
    async fn pending_tasks_can_be_cancelled() {
        let tuner = tuner(2);
        tuner.add_task(TuningTask::new("hammer", 0, quick(2)));
        let doomed = tuner.add_task(TuningTask::new("doji", 0, quick(2)));

        assert!(tuner.cancel_task(&doomed).unwrap());
        assert!(!tuner.cancel_task(&doomed).unwrap());
        assert!(matches!(
            tuner.cancel_task("no-such-task"),
            Err(PfError::Tuning(TuningError::TaskNotFound { .. }))
        ));

        let outcomes = tuner.run_batch().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(tuner.get_task(&doomed).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(tuner.get_status().cancelled_count, 1);
    }

    #[tokio::test]
    async fn a_panicking_task_does_not_take_down_the_batch() {
        let (tuner, _) = tuner_with(TunerConfig::default().with_max_workers(2), "doji");
        let report = tuner
            .one_click_optimize(
                Some(vec!["hammer".to_string(), "doji".to_string(), "shooting_star".to_string()]),
                OptimizationMethod::Random,
                3,
            )
            .await
            .unwrap();

        assert_eq!(report.total_tasks, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 1);
        let doji = report.outcomes.iter().find(|o| o.algorithm_key == "doji").unwrap();
        assert_eq!(doji.status, TaskStatus::Failed);
        assert!(doji.error_message.as_deref().unwrap().contains("panicked"));
        assert!(report.recommendations.iter().any(|r| r.contains("doji")));
    }

    #[tokio::test]
    async fn unknown_algorithm_fails_its_task() {
        let tuner = tuner(1);
        let report = tuner
            .one_click_optimize(Some(vec!["no_such_pattern".to_string()]), OptimizationMethod::Random, 2)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.success_rate, 0.0);
    }

    #[tokio::test]
    async fn one_click_defaults_to_every_active_algorithm() {
        let tuner = tuner(4);
        let report = tuner
            .one_click_optimize(None, OptimizationMethod::Bayesian, 6)
            .await
            .unwrap();
        assert_eq!(report.total_tasks, 5);
        assert_eq!(report.status, ReportStatus::Completed);
        assert!(report.outcomes.iter().all(|o| o.iterations == 6));
    }

    #[tokio::test]
    async fn one_click_runs_algorithms_in_the_order_given() {
        let tuner = tuner(1);
        let keys: Vec<String> = ["shooting_star", "doji", "hammer"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        let report = tuner
            .one_click_optimize(Some(keys.clone()), OptimizationMethod::Random, 2)
            .await
            .unwrap();

        let order: Vec<&str> = report.outcomes.iter().map(|o| o.algorithm_key.as_str()).collect();
        assert_eq!(order, vec!["shooting_star", "doji", "hammer"]);
        let priorities: Vec<(String, i32)> = tuner
            .tasks()
            .into_iter()
            .map(|t| (t.algorithm_key, t.priority))
            .collect();
        assert_eq!(
            priorities,
            vec![
                ("shooting_star".to_string(), 0),
                ("doji".to_string(), 1),
                ("hammer".to_string(), 2)
            ]
        );
    }

    #[tokio::test]
    async fn smart_optimize_is_a_no_op_when_everything_scores_well() {
        let (tuner, catalog) = tuner_with(TunerConfig::default().with_max_workers(2), "");
        for config in catalog.list() {
            set_threshold(&catalog, config.key(), 0.8);
        }

        let report = tuner.smart_optimize(0.9, 0.1).await.unwrap();
        assert_eq!(report.status, ReportStatus::NoOptimizationNeeded);
        assert_eq!(report.total_tasks, 0);
        assert_eq!(report.current_scores.len(), 5);
        assert!(report.current_scores.values().all(|s| *s >= 0.9));
        assert!(tuner.tasks().is_empty());
        assert_eq!(tuner.get_status(), TunerStatus::default());
    }

    #[tokio::test]
    async fn scores_skip_algorithms_without_datasets() {
        let (tuner, _) = tuner_over(
            TunerConfig::default(),
            Arc::new(FailingProvider {
                inner: SyntheticDatasetProvider::new(9).with_length(30),
                fail_for: "hammer",
            }),
        );
        let scores = tuner.current_scores().await.unwrap();
        assert_eq!(scores.len(), 4);
        assert!(!scores.contains_key("hammer"));
        assert!(scores.contains_key("doji"));
    }

    #[tokio::test]
    async fn smart_optimize_queues_worst_first() {
        let (tuner, catalog) = tuner_with(
            TunerConfig::default()
                .with_max_workers(1)
                .with_default_method(OptimizationMethod::Random, 2),
            "",
        );
        for key in ["shooting_star", "bullish_engulfing", "bearish_engulfing"] {
            set_threshold(&catalog, key, 0.8);
        }
        set_threshold(&catalog, "hammer", 0.2);
        set_threshold(&catalog, "doji", 0.5);

        let report = tuner.smart_optimize(0.85, 0.1).await.unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
        let order: Vec<&str> = report.outcomes.iter().map(|o| o.algorithm_key.as_str()).collect();
        assert_eq!(order, vec!["hammer", "doji"]);
        assert!(report.current_scores["hammer"] < report.current_scores["doji"]);
        // worse score, bigger budget
        assert!(report.outcomes[0].iterations >= report.outcomes[1].iterations);
    }

    #[tokio::test]
    async fn events_follow_the_task_lifecycle() {
        let tuner = tuner(1);
        let events = tuner.subscribe();
        let id = tuner.add_task(TuningTask::new("hammer", 0, quick(3)));
        tuner.run_batch().await;

        let received: Vec<TunerEvent> = events.try_iter().collect();
        assert!(matches!(received.first(), Some(TunerEvent::Queued { task_id, .. }) if *task_id == id));
        assert!(matches!(received.get(1), Some(TunerEvent::Started { .. })));
        assert!(matches!(received.last(), Some(TunerEvent::Completed { .. })));
        let progress = received
            .iter()
            .filter(|e| matches!(e, TunerEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 3);
    }

    #[tokio::test]
    async fn improved_versions_can_be_auto_activated() {
        let (tuner, catalog) = tuner_with(TunerConfig::default().with_max_workers(1).with_auto_activate(0.0), "");
        let report = tuner
            .one_click_optimize(Some(vec!["hammer".to_string()]), OptimizationMethod::Random, 20)
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        let version_id = outcome.best_version_id.expect("0.5 is far from the optimum");
        assert!(outcome.activated);

        let store = tuner.optimizer().store();
        assert_eq!(store.get_active_version("hammer").unwrap().unwrap().id, version_id);
        let live = catalog.get("hammer").unwrap();
        assert_eq!(live.parameters, store.get_version(version_id).unwrap().unwrap().parameters);
    }

    #[tokio::test]
    async fn request_stop_ends_the_batch_early() {
        let tuner = Arc::new(tuner(1));
        let events = tuner.subscribe();
        tuner.add_task(TuningTask::new("hammer", 0, quick(1_000_000)));
        tuner.add_task(TuningTask::new("doji", 0, quick(1_000_000)));

        let stopper = tuner.clone();
        let watcher = std::thread::spawn(move || {
            for event in events.iter() {
                if matches!(event, TunerEvent::Progress { .. }) {
                    stopper.request_stop();
                    break;
                }
            }
        });

        let outcomes = tuner.run_batch().await;
        watcher.join().unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, TaskStatus::Completed);
        assert!(outcomes[0].iterations < 1_000_000);
        assert_eq!(tuner.get_status().queued_count, 1);
    }
}
