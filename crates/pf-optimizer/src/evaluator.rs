//! Scores a candidate parameter set against a batch of test datasets.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pf_data::PatternRecognizer;
use pf_types::{
    Detection, EvaluationError, Parameters, PerformanceMetrics, PfResult, Timeseries,
};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Evaluator tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Re-run with perturbed parameters to measure sensitivity.
    pub sensitivity_analysis: bool,
    /// Relative perturbation applied up and down to each numeric parameter.
    pub perturbation: f64,
    /// Mean execution time (seconds) at which the time score reaches zero.
    pub time_budget_secs: f64,
    /// Detections above this confidence count as high quality.
    pub high_confidence: f64,
    /// Sample process memory/CPU while each dataset run executes.
    pub sample_resources: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            sensitivity_analysis: true,
            perturbation: 0.2,
            time_budget_secs: 10.0,
            high_confidence: 0.7,
            sample_resources: true,
        }
    }
}

impl EvaluatorConfig {
    pub fn without_sensitivity(mut self) -> Self {
        self.sensitivity_analysis = false;
        self
    }

    pub fn without_resource_sampling(mut self) -> Self {
        self.sample_resources = false;
        self
    }
}

/// How often the resource sampler polls while a recognizer runs
const SAMPLE_INTERVAL: Duration = Duration::from_millis(5);

/// Weights of the components of `overall_score`
const SIGNAL_QUALITY_WEIGHT: f64 = 0.3;
const CONFIDENCE_WEIGHT: f64 = 0.2;
const TIME_WEIGHT: f64 = 0.15;
const ROBUSTNESS_WEIGHT: f64 = 0.15;
const SENSITIVITY_WEIGHT: f64 = 0.1;
const F1_WEIGHT: f64 = 0.1;

/// Process memory/CPU sampler
struct ResourceSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for ResourceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSampler").field("pid", &self.pid).finish()
    }
}

impl ResourceSampler {
    fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// (resident memory in MB, CPU percent) of this process
    fn sample(&self) -> (f64, f64) {
        let Some(pid) = self.pid else {
            return (0.0, 0.0);
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return (0.0, 0.0);
        }
        system
            .process(pid)
            .map(|p| (p.memory() as f64 / (1024.0 * 1024.0), p.cpu_usage() as f64))
            .unwrap_or((0.0, 0.0))
    }

    /// Run `f` while polling this process in the background, returning its
    /// result with the highest memory and CPU readings seen during the run.
    fn watch<T>(&self, f: impl FnOnce() -> T) -> (T, ResourcePeak) {
        thread::scope(|scope| {
            let (done, stopped) = mpsc::channel::<()>();
            let poller = scope.spawn(move || {
                let mut peak = ResourcePeak::default();
                loop {
                    let (mb, cpu) = self.sample();
                    peak.record(mb, cpu);
                    if !matches!(
                        stopped.recv_timeout(SAMPLE_INTERVAL),
                        Err(mpsc::RecvTimeoutError::Timeout)
                    ) {
                        break;
                    }
                }
                peak
            });
            let out = f();
            drop(done);
            let mut peak = poller.join().unwrap_or_default();
            let (mb, cpu) = self.sample();
            peak.record(mb, cpu);
            (out, peak)
        })
    }
}

/// Running maximum of resource readings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct ResourcePeak {
    memory_mb: f64,
    cpu_pct: f64,
}

impl ResourcePeak {
    fn record(&mut self, memory_mb: f64, cpu_pct: f64) {
        self.memory_mb = self.memory_mb.max(memory_mb);
        self.cpu_pct = self.cpu_pct.max(cpu_pct);
    }
}

/// Result of one successful recognizer run
struct DatasetRun {
    detections: Vec<Detection>,
    elapsed_secs: f64,
    memory_mb: f64,
    cpu_pct: f64,
}

/// Runs a recognizer over datasets and turns the detections into
/// [`PerformanceMetrics`].
#[derive(Debug)]
pub struct PerformanceEvaluator {
    recognizer: Arc<dyn PatternRecognizer>,
    config: EvaluatorConfig,
    sampler: ResourceSampler,
}

impl PerformanceEvaluator {
    pub fn new(recognizer: Arc<dyn PatternRecognizer>) -> Self {
        Self::with_config(recognizer, EvaluatorConfig::default())
    }

    pub fn with_config(recognizer: Arc<dyn PatternRecognizer>, config: EvaluatorConfig) -> Self {
        Self {
            recognizer,
            config,
            sampler: ResourceSampler::new(),
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Arc<dyn PatternRecognizer> {
        &self.recognizer
    }

    /// Evaluate `parameters` for `algorithm_key`. Never fails.
    ///
    /// Datasets without candles are ignored. With nothing usable the result
    /// is [`PerformanceMetrics::neutral`]; when every usable dataset fails it
    /// is [`PerformanceMetrics::failed`].
    pub fn evaluate(
        &self,
        algorithm_key: &str,
        parameters: &Parameters,
        datasets: &[Timeseries],
    ) -> PerformanceMetrics {
        let usable: Vec<&Timeseries> = datasets.iter().filter(|d| !d.is_empty()).collect();
        if usable.is_empty() {
            debug!(algorithm = algorithm_key, "no usable datasets, returning neutral metrics");
            return PerformanceMetrics::neutral();
        }

        let runs: Vec<DatasetRun> = usable
            .iter()
            .filter_map(|series| self.run_dataset(algorithm_key, parameters, series))
            .collect();

        if runs.is_empty() {
            warn!(
                algorithm = algorithm_key,
                datasets = usable.len(),
                "every dataset failed"
            );
            return PerformanceMetrics::failed();
        }

        let n = runs.len() as f64;
        let confidences: Vec<f64> = runs
            .iter()
            .flat_map(|r| r.detections.iter().map(|d| d.confidence))
            .collect();
        let (confidence_avg, confidence_std) = mean_std(&confidences);

        let mut metrics = PerformanceMetrics {
            execution_time: runs.iter().map(|r| r.elapsed_secs).sum::<f64>() / n,
            memory_usage: runs.iter().map(|r| r.memory_mb).sum::<f64>() / n,
            cpu_usage: runs.iter().map(|r| r.cpu_pct).sum::<f64>() / n,
            patterns_found: confidences.len() as u64,
            confidence_avg,
            confidence_std,
            signal_quality: self.signal_quality(&confidences),
            robustness_score: robustness(&runs),
            ..PerformanceMetrics::default()
        };

        metrics.parameter_sensitivity = if self.config.sensitivity_analysis {
            self.sensitivity(algorithm_key, parameters, &usable, metrics.signal_quality)
        } else {
            0.5
        };
        metrics.overall_score = self.overall_score(&metrics);

        debug!(
            algorithm = algorithm_key,
            datasets = runs.len(),
            patterns = metrics.patterns_found,
            overall = metrics.overall_score,
            "evaluation finished"
        );
        metrics
    }

    fn run_dataset(
        &self,
        algorithm_key: &str,
        parameters: &Parameters,
        series: &Timeseries,
    ) -> Option<DatasetRun> {
        let started = Instant::now();
        let (result, peak) = if self.config.sample_resources {
            self.sampler
                .watch(|| self.recognize(algorithm_key, parameters, series))
        } else {
            (
                self.recognize(algorithm_key, parameters, series),
                ResourcePeak::default(),
            )
        };
        let elapsed_secs = started.elapsed().as_secs_f64();
        match result {
            Ok(detections) => Some(DatasetRun {
                detections,
                elapsed_secs,
                memory_mb: peak.memory_mb,
                cpu_pct: peak.cpu_pct,
            }),
            Err(e) => {
                warn!(algorithm = algorithm_key, dataset = %series.label, "skipping dataset: {}", e);
                None
            }
        }
    }

    /// Call the recognizer, turning a panic into an error.
    fn recognize(
        &self,
        algorithm_key: &str,
        parameters: &Parameters,
        series: &Timeseries,
    ) -> PfResult<Vec<Detection>> {
        catch_unwind(AssertUnwindSafe(|| {
            self.recognizer.recognize(algorithm_key, parameters, series)
        }))
        .unwrap_or_else(|payload| {
            Err(EvaluationError::RecognizerPanicked {
                message: panic_message(payload.as_ref()),
            }
            .into())
        })
    }

    fn signal_quality(&self, confidences: &[f64]) -> f64 {
        if confidences.is_empty() {
            return 0.0;
        }
        let (mean, std) = mean_std(confidences);
        let high = confidences
            .iter()
            .filter(|c| **c > self.config.high_confidence)
            .count() as f64
            / confidences.len() as f64;
        (0.4 * high + 0.3 * (1.0 - std) + 0.3 * mean).clamp(0.0, 1.0)
    }

    /// `1 - mean relative change of signal quality` under +/- perturbation
    /// of each numeric parameter.
    fn sensitivity(
        &self,
        algorithm_key: &str,
        parameters: &Parameters,
        datasets: &[&Timeseries],
        base_quality: f64,
    ) -> f64 {
        let mut changes = Vec::new();
        for (name, value) in parameters {
            let Some(v) = value.as_f64() else {
                continue;
            };
            for factor in [1.0 + self.config.perturbation, 1.0 - self.config.perturbation] {
                let mut perturbed = parameters.clone();
                perturbed.insert(name.clone(), value.with_numeric(v * factor));

                let confidences: Vec<f64> = datasets
                    .iter()
                    .filter_map(|series| self.recognize(algorithm_key, &perturbed, series).ok())
                    .flat_map(|detections| detections.into_iter().map(|d| d.confidence))
                    .collect();
                let quality = self.signal_quality(&confidences);

                let change = if base_quality > 0.0 {
                    (quality - base_quality).abs() / base_quality
                } else if quality == base_quality {
                    0.0
                } else {
                    1.0
                };
                changes.push(change.min(1.0));
            }
        }

        if changes.is_empty() {
            return 0.5;
        }
        let avg = changes.iter().sum::<f64>() / changes.len() as f64;
        (1.0 - avg).clamp(0.0, 1.0)
    }

    fn overall_score(&self, m: &PerformanceMetrics) -> f64 {
        let time_score = (1.0 - m.execution_time / self.config.time_budget_secs).clamp(0.0, 1.0);
        let mut components = vec![
            (SIGNAL_QUALITY_WEIGHT, m.signal_quality),
            (CONFIDENCE_WEIGHT, m.confidence_avg),
            (TIME_WEIGHT, time_score),
            (ROBUSTNESS_WEIGHT, m.robustness_score),
            (SENSITIVITY_WEIGHT, m.parameter_sensitivity),
        ];
        // f1 only means something with ground-truth labels
        if m.true_positives + m.false_positives + m.false_negatives > 0 {
            components.push((F1_WEIGHT, m.f1_score));
        }

        let total_weight: f64 = components.iter().map(|(w, _)| w).sum();
        let score = components.iter().map(|(w, c)| w * c).sum::<f64>() / total_weight;
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.5
        }
    }
}

/// `1 - CV` of per-dataset mean confidence; 0.5 when it cannot be measured.
fn robustness(runs: &[DatasetRun]) -> f64 {
    if runs.len() < 2 {
        return 0.5;
    }
    let means: Vec<f64> = runs
        .iter()
        .map(|r| {
            let confidences: Vec<f64> = r.detections.iter().map(|d| d.confidence).collect();
            mean_std(&confidences).0
        })
        .collect();
    let (mean, std) = mean_std(&means);
    if mean <= 0.0 {
        return 0.5;
    }
    (1.0 - std / mean).clamp(0.0, 1.0)
}

/// Mean and population standard deviation; zeros for an empty slice.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
