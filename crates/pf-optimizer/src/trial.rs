//! Run configuration, per-candidate trials and run results.

use chrono::{DateTime, Utc};
use pf_types::{
    OptimizationError, OptimizationMethod, Parameters, PerformanceMetrics, PfResult, VersionId,
};
use serde::{Deserialize, Serialize};

/// Strategy selection and hyperparameters for one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub method: OptimizationMethod,

    /// Iterations for random/bayesian/gradient, generations for genetic.
    pub max_iterations: usize,

    pub population_size: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,

    /// Name of the [`PerformanceMetrics`] field to maximize.
    pub target_metric: String,

    /// Minimum gain over the baseline the genetic search must reach before
    /// it is allowed to stop early.
    pub min_improvement: f64,

    /// Advisory wall-clock budget, checked between iterations.
    pub timeout_minutes: u64,

    pub parallel_workers: usize,

    /// Step size for the gradient strategy.
    pub learning_rate: f64,

    /// Seed for reproducible candidate streams; random when unset.
    pub seed: Option<u64>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            method: OptimizationMethod::Genetic,
            max_iterations: 100,
            population_size: 20,
            mutation_rate: 0.1,
            crossover_rate: 0.8,
            target_metric: "overall_score".to_string(),
            min_improvement: 0.01,
            timeout_minutes: 30,
            parallel_workers: 4,
            learning_rate: 0.01,
            seed: None,
        }
    }
}

impl OptimizationConfig {
    pub fn new(method: OptimizationMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_population_size(mut self, n: usize) -> Self {
        self.population_size = n;
        self
    }

    pub fn with_rates(mut self, mutation: f64, crossover: f64) -> Self {
        self.mutation_rate = mutation;
        self.crossover_rate = crossover;
        self
    }

    pub fn with_target_metric(mut self, metric: &str) -> Self {
        self.target_metric = metric.to_string();
        self
    }

    pub fn with_min_improvement(mut self, delta: f64) -> Self {
        self.min_improvement = delta;
        self
    }

    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> PfResult<()> {
        if !self.method.is_search() {
            return Err(OptimizationError::UnknownMethod {
                method: self.method.to_string(),
            }
            .into());
        }
        if PerformanceMetrics::default().metric(&self.target_metric).is_none() {
            return Err(OptimizationError::UnknownMetric {
                metric: self.target_metric.clone(),
            }
            .into());
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be at least 1"));
        }
        if self.method == OptimizationMethod::Genetic && self.population_size < 2 {
            return Err(invalid("population_size must be at least 2"));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) || !(0.0..=1.0).contains(&self.crossover_rate) {
            return Err(invalid("mutation_rate and crossover_rate must be within [0, 1]"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(invalid("learning_rate must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> pf_types::PfError {
    OptimizationError::InvalidConfig {
        message: message.to_string(),
    }
    .into()
}

/// One scored candidate, as written to the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub iteration: usize,
    pub parameters: Parameters,
    pub score: f64,
    pub best_so_far: f64,
}

/// Outcome of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub session_id: String,
    pub algorithm_key: String,
    pub method: OptimizationMethod,
    pub baseline_score: f64,
    pub best_score: f64,
    pub improvement_percentage: f64,
    /// Iterations (generations for genetic) actually run.
    pub iterations: usize,
    pub evaluations: usize,
    /// Set only when a candidate strictly beat the baseline and was saved.
    pub best_version_id: Option<VersionId>,
    pub best_parameters: Parameters,
    pub best_metrics: Option<PerformanceMetrics>,
    /// Best fitness per generation (genetic only).
    pub generation_best: Vec<f64>,
    pub stopped_early: bool,
    pub log: Vec<Trial>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OptimizationResult {
    pub fn improved(&self) -> bool {
        self.best_version_id.is_some()
    }
}

/// `(best - baseline) / baseline * 100`; a zero baseline maps to 100 or 0.
pub fn improvement_percentage(baseline: f64, best: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        if best > 0.0 {
            100.0
        } else {
            0.0
        }
    } else {
        (best - baseline) / baseline.abs() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OptimizationConfig::default();
        assert_eq!(config.method, OptimizationMethod::Genetic);
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.population_size, 20);
        assert_eq!(config.target_metric, "overall_score");
        assert_eq!(config.timeout_minutes, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_configs() {
        assert!(OptimizationConfig::new(OptimizationMethod::Import).validate().is_err());
        assert!(OptimizationConfig::default()
            .with_target_metric("sharpe")
            .validate()
            .is_err());
        assert!(OptimizationConfig::default().with_rates(1.5, 0.8).validate().is_err());
        assert!(OptimizationConfig::default().with_population_size(1).validate().is_err());
        assert!(OptimizationConfig::new(OptimizationMethod::Random)
            .with_population_size(1)
            .validate()
            .is_ok());
        assert!(OptimizationConfig::default()
            .with_target_metric("signalQuality")
            .validate()
            .is_ok());
    }

    #[test]
    fn improvement_handles_zero_baseline() {
        assert_eq!(improvement_percentage(0.0, 0.3), 100.0);
        assert_eq!(improvement_percentage(0.0, 0.0), 0.0);
        assert!((improvement_percentage(0.4, 0.5) - 25.0).abs() < 1e-9);
        assert!(improvement_percentage(0.5, 0.4) < 0.0);
    }
}
