//! Optimization run envelope: session bookkeeping, baseline scoring,
//! strategy execution and persistence of the winning candidate.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use pf_store::VersionStore;
use pf_types::{
    AlgorithmConfig, OptimizationError, PfResult, SessionOutcome, Timeseries, VersionId,
};
use tracing::{error, info, warn};

use crate::evaluator::PerformanceEvaluator;
use crate::search::{strategy_for, ProgressFn, SearchContext};
use crate::trial::{improvement_percentage, OptimizationConfig, OptimizationResult};

/// Cooperative controls for a running optimization.
#[derive(Clone, Default)]
pub struct RunControl {
    pub stop: Option<Arc<AtomicBool>>,
    pub progress: Option<Arc<ProgressFn>>,
}

impl std::fmt::Debug for RunControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunControl")
            .field("stop", &self.stop)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl RunControl {
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Runs search strategies and records their outcome in the version store.
#[derive(Debug, Clone)]
pub struct Optimizer {
    store: Arc<VersionStore>,
    evaluator: Arc<PerformanceEvaluator>,
}

impl Optimizer {
    pub fn new(store: Arc<VersionStore>, evaluator: Arc<PerformanceEvaluator>) -> Self {
        Self { store, evaluator }
    }

    pub fn store(&self) -> &Arc<VersionStore> {
        &self.store
    }

    pub fn evaluator(&self) -> &Arc<PerformanceEvaluator> {
        &self.evaluator
    }

    /// Search for parameters that beat `baseline` on `config.target_metric`.
    ///
    /// The run is recorded as a session. A new version (child of the
    /// currently active one) is saved only when the best candidate strictly
    /// beats the baseline; it is not activated.
    pub fn optimize(
        &self,
        baseline: &AlgorithmConfig,
        config: &OptimizationConfig,
        datasets: &[Timeseries],
        control: &RunControl,
    ) -> PfResult<OptimizationResult> {
        let algorithm_key = baseline.key();
        let mut strategy = strategy_for(config)?;

        let parent = self.store.get_active_version(algorithm_key)?;
        let parent_id = parent.as_ref().map(|v| v.id);
        let session_id = self.store.start_session(
            algorithm_key,
            config.method,
            parent_id,
            &serde_json::to_string(config)?,
        )?;

        info!(
            algorithm = algorithm_key,
            method = strategy.name(),
            session = %session_id,
            datasets = datasets.len(),
            "optimization started"
        );

        match self.run_session(baseline, config, datasets, control, strategy.as_mut(), &session_id, parent_id) {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(algorithm = algorithm_key, session = %session_id, "optimization failed: {}", e);
                if let Err(log_err) = self.store.fail_session(&session_id, &e.to_string()) {
                    warn!(session = %session_id, "could not mark session failed: {}", log_err);
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_session(
        &self,
        baseline: &AlgorithmConfig,
        config: &OptimizationConfig,
        datasets: &[Timeseries],
        control: &RunControl,
        strategy: &mut dyn crate::search::SearchStrategy,
        session_id: &str,
        parent_id: Option<VersionId>,
    ) -> PfResult<OptimizationResult> {
        let algorithm_key = baseline.key();
        let started_at = Utc::now();

        if datasets.is_empty() {
            return Err(OptimizationError::NoDatasets {
                algorithm_key: algorithm_key.to_string(),
            }
            .into());
        }

        let baseline_metrics = self
            .evaluator
            .evaluate(algorithm_key, &baseline.parameters, datasets);
        let baseline_score = baseline_metrics
            .metric(&config.target_metric)
            .filter(|s| s.is_finite())
            .unwrap_or(0.0);

        let mut ctx = SearchContext::new(
            &self.evaluator,
            algorithm_key,
            datasets,
            config,
            baseline.parameters.clone(),
            baseline_score,
        );
        if let Some(stop) = &control.stop {
            ctx = ctx.with_stop_flag(stop.clone());
        }
        if let Some(progress) = &control.progress {
            ctx = ctx.with_progress(progress.clone());
        }

        strategy.run(&mut ctx)?;

        let best_score = ctx.best_score();
        let improvement = improvement_percentage(baseline_score, best_score);
        let best_parameters = ctx.best_parameters().clone();
        let best_metrics = ctx.best_metrics().cloned();

        let best_version_id = match &best_metrics {
            Some(metrics) if best_score > baseline_score => {
                let description = format!(
                    "{} optimization: {} {:.4} -> {:.4} ({:+.2}%) after {} iterations",
                    config.method,
                    config.target_metric,
                    baseline_score,
                    best_score,
                    improvement,
                    ctx.iterations()
                );
                let id = self.store.save_version(
                    algorithm_key,
                    &baseline.code,
                    &best_parameters,
                    &description,
                    config.method,
                    parent_id,
                )?;
                self.store.save_metrics(id, metrics)?;
                Some(id)
            }
            _ => None,
        };

        let iterations = ctx.iterations();
        let evaluations = ctx.evaluations();
        let generation_best = ctx.generation_best().to_vec();
        let stopped_early = ctx.stopped_early();
        let log = ctx.into_log();

        self.store.complete_session(
            session_id,
            &SessionOutcome {
                final_version_id: best_version_id,
                iterations,
                best_score,
                improvement_percentage: improvement,
                log_text: serde_json::to_string(&log)?,
            },
        )?;

        info!(
            algorithm = algorithm_key,
            session = session_id,
            baseline = baseline_score,
            best = best_score,
            improvement,
            iterations,
            version = ?best_version_id,
            "optimization finished"
        );

        Ok(OptimizationResult {
            session_id: session_id.to_string(),
            algorithm_key: algorithm_key.to_string(),
            method: config.method,
            baseline_score,
            best_score,
            improvement_percentage: improvement,
            iterations,
            evaluations,
            best_version_id,
            best_parameters,
            best_metrics: best_metrics.or(Some(baseline_metrics)),
            generation_best,
            stopped_early,
            log,
            started_at,
            finished_at: Utc::now(),
        })
    }
}
