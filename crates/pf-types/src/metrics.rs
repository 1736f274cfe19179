//! Performance metrics produced by the evaluator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version::VersionId;

/// Multi-dimensional evaluation of one candidate parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // --- accuracy (needs ground-truth labels; zero otherwise) ---
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub accuracy: f64,

    // --- resources ---
    /// Mean wall-clock seconds per dataset.
    pub execution_time: f64,
    /// Mean resident memory in MB sampled after each run.
    pub memory_usage: f64,
    /// Mean process CPU usage in percent.
    pub cpu_usage: f64,

    // --- signal ---
    pub signal_quality: f64,
    pub confidence_avg: f64,
    pub confidence_std: f64,
    pub patterns_found: u64,

    // --- stability ---
    pub robustness_score: f64,
    pub parameter_sensitivity: f64,

    pub overall_score: f64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            true_positives: 0,
            false_positives: 0,
            true_negatives: 0,
            false_negatives: 0,
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
            accuracy: 0.0,
            execution_time: 0.0,
            memory_usage: 0.0,
            cpu_usage: 0.0,
            signal_quality: 0.0,
            confidence_avg: 0.0,
            confidence_std: 0.0,
            patterns_found: 0,
            robustness_score: 0.5,
            parameter_sensitivity: 0.5,
            overall_score: 0.5,
        }
    }
}

impl PerformanceMetrics {
    /// Field names accepted by [`PerformanceMetrics::metric`], in snake_case.
    pub const FIELDS: [&'static str; 18] = [
        "true_positives",
        "false_positives",
        "true_negatives",
        "false_negatives",
        "precision",
        "recall",
        "f1_score",
        "accuracy",
        "execution_time",
        "memory_usage",
        "cpu_usage",
        "signal_quality",
        "confidence_avg",
        "confidence_std",
        "patterns_found",
        "robustness_score",
        "parameter_sensitivity",
        "overall_score",
    ];

    /// Neutral result used when there was nothing to evaluate.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Result used when every dataset failed.
    pub fn failed() -> Self {
        Self {
            robustness_score: 0.0,
            parameter_sensitivity: 0.0,
            overall_score: 0.0,
            ..Self::default()
        }
    }

    /// Look up a metric by name. Accepts snake_case or camelCase.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let normalized = normalize_metric_name(name);
        let value = match normalized.as_str() {
            "true_positives" => self.true_positives as f64,
            "false_positives" => self.false_positives as f64,
            "true_negatives" => self.true_negatives as f64,
            "false_negatives" => self.false_negatives as f64,
            "precision" => self.precision,
            "recall" => self.recall,
            "f1_score" => self.f1_score,
            "accuracy" => self.accuracy,
            "execution_time" => self.execution_time,
            "memory_usage" => self.memory_usage,
            "cpu_usage" => self.cpu_usage,
            "signal_quality" => self.signal_quality,
            "confidence_avg" => self.confidence_avg,
            "confidence_std" => self.confidence_std,
            "patterns_found" => self.patterns_found as f64,
            "robustness_score" => self.robustness_score,
            "parameter_sensitivity" => self.parameter_sensitivity,
            "overall_score" => self.overall_score,
            _ => return None,
        };
        Some(value)
    }

    /// All metrics as `(name, value)` pairs in declaration order.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        Self::FIELDS
            .iter()
            .filter_map(|name| self.metric(name).map(|v| (*name, v)))
            .collect()
    }
}

/// `f1Score` -> `f1_score`, `overallScore` -> `overall_score`.
pub fn normalize_metric_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// A metrics snapshot as persisted against a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub id: i64,
    pub version_id: VersionId,
    pub algorithm_key: String,
    pub test_time: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_defaults() {
        let m = PerformanceMetrics::neutral();
        assert_eq!(m.overall_score, 0.5);
        assert_eq!(m.robustness_score, 0.5);
        assert_eq!(m.f1_score, 0.0);
        assert_eq!(PerformanceMetrics::failed().overall_score, 0.0);
    }

    #[test]
    fn metric_lookup_accepts_both_cases() {
        let m = PerformanceMetrics {
            signal_quality: 0.8,
            f1_score: 0.25,
            ..Default::default()
        };
        assert_eq!(m.metric("signal_quality"), Some(0.8));
        assert_eq!(m.metric("signalQuality"), Some(0.8));
        assert_eq!(m.metric("f1Score"), Some(0.25));
        assert_eq!(m.metric("sharpe_ratio"), None);
    }

    #[test]
    fn entries_cover_every_field() {
        let m = PerformanceMetrics::default();
        assert_eq!(m.entries().len(), PerformanceMetrics::FIELDS.len());
    }
}
