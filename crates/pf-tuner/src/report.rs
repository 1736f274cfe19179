//! Batch outcomes and the summary report built from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pf_types::VersionId;
use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskStatus, TuningTask};

/// Success rate below which failures need investigating, in percent.
pub const MIN_SUCCESS_RATE: f64 = 80.0;
/// Average improvement below which algorithms need manual review, in percent.
pub const LOW_IMPROVEMENT: f64 = 5.0;
/// Average improvement above which new versions are worth activating, in percent.
pub const HIGH_IMPROVEMENT: f64 = 20.0;

/// Per-task summary returned by a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub algorithm_key: String,
    pub status: TaskStatus,
    pub baseline_score: Option<f64>,
    pub best_score: Option<f64>,
    pub improvement_percentage: Option<f64>,
    pub best_version_id: Option<VersionId>,
    pub iterations: usize,
    pub activated: bool,
    pub duration_secs: Option<f64>,
    pub error_message: Option<String>,
}

impl TaskOutcome {
    pub fn from_task(task: &TuningTask, activated: bool) -> Self {
        let result = task.result.as_ref();
        Self {
            task_id: task.id.clone(),
            algorithm_key: task.algorithm_key.clone(),
            status: task.status,
            baseline_score: result.map(|r| r.baseline_score),
            best_score: result.map(|r| r.best_score),
            improvement_percentage: result.map(|r| r.improvement_percentage),
            best_version_id: result.and_then(|r| r.best_version_id),
            iterations: result.map(|r| r.iterations).unwrap_or(0),
            activated,
            duration_secs: task.duration_secs(),
            error_message: task.error_message.clone(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Completed,
    NoOptimizationNeeded,
}

/// Summary of a one-click or smart optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub status: ReportStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_tasks: usize,
    pub completed: usize,
    pub failed: usize,
    /// Percent of tasks that completed.
    pub success_rate: f64,
    /// Mean improvement over completed tasks, in percent.
    pub average_improvement: f64,
    pub best_improvement: f64,
    pub best_algorithm: Option<String>,
    /// Scores measured before optimization (smart runs only).
    pub current_scores: BTreeMap<String, f64>,
    pub outcomes: Vec<TaskOutcome>,
    pub recommendations: Vec<String>,
}

impl TuningReport {
    pub fn from_outcomes(outcomes: Vec<TaskOutcome>, started_at: DateTime<Utc>) -> Self {
        let total_tasks = outcomes.len();
        let completed: Vec<&TaskOutcome> = outcomes.iter().filter(|o| o.succeeded()).collect();
        let failed = outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Failed)
            .count();

        let success_rate = if total_tasks == 0 {
            0.0
        } else {
            completed.len() as f64 / total_tasks as f64 * 100.0
        };

        let improvements: Vec<(&str, f64)> = completed
            .iter()
            .map(|o| (o.algorithm_key.as_str(), o.improvement_percentage.unwrap_or(0.0)))
            .collect();
        let average_improvement = if improvements.is_empty() {
            0.0
        } else {
            improvements.iter().map(|(_, v)| v).sum::<f64>() / improvements.len() as f64
        };
        let best = improvements
            .iter()
            .copied()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut report = Self {
            status: ReportStatus::Completed,
            started_at,
            finished_at: Utc::now(),
            total_tasks,
            completed: completed.len(),
            failed,
            success_rate,
            average_improvement,
            best_improvement: best.map(|(_, v)| v).unwrap_or(0.0),
            best_algorithm: best.map(|(k, _)| k.to_string()),
            current_scores: BTreeMap::new(),
            outcomes,
            recommendations: Vec::new(),
        };
        report.recommendations = report.build_recommendations();
        report
    }

    /// Report for a smart run where every algorithm already met the threshold.
    pub fn no_optimization_needed(current_scores: BTreeMap<String, f64>, threshold: f64) -> Self {
        let now = Utc::now();
        Self {
            status: ReportStatus::NoOptimizationNeeded,
            started_at: now,
            finished_at: now,
            total_tasks: 0,
            completed: 0,
            failed: 0,
            success_rate: 100.0,
            average_improvement: 0.0,
            best_improvement: 0.0,
            best_algorithm: None,
            recommendations: vec![format!(
                "All {} algorithms score at or above {:.2}; no optimization needed",
                current_scores.len(),
                threshold
            )],
            current_scores,
            outcomes: Vec::new(),
        }
    }

    pub fn with_current_scores(mut self, scores: BTreeMap<String, f64>) -> Self {
        self.current_scores = scores;
        self
    }

    fn build_recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.total_tasks == 0 {
            out.push("No tasks were run".to_string());
            return out;
        }

        if self.success_rate < MIN_SUCCESS_RATE {
            out.push(format!(
                "Success rate {:.1}% is below {:.0}%; investigate the failing tasks",
                self.success_rate, MIN_SUCCESS_RATE
            ));
        }
        if self.completed > 0 {
            if self.average_improvement < LOW_IMPROVEMENT {
                out.push(format!(
                    "Average improvement {:.2}% is below {:.0}%; review the algorithms manually",
                    self.average_improvement, LOW_IMPROVEMENT
                ));
            } else if self.average_improvement > HIGH_IMPROVEMENT {
                out.push(format!(
                    "Average improvement {:.2}% exceeds {:.0}%; consider activating the new versions",
                    self.average_improvement, HIGH_IMPROVEMENT
                ));
            }
        }
        for outcome in self.outcomes.iter().filter(|o| o.status == TaskStatus::Failed) {
            out.push(format!(
                "Optimization of {} failed: {}",
                outcome.algorithm_key,
                outcome.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(key: &str, status: TaskStatus, improvement: Option<f64>) -> TaskOutcome {
        TaskOutcome {
            task_id: format!("task-{key}"),
            algorithm_key: key.to_string(),
            status,
            baseline_score: improvement.map(|_| 0.5),
            best_score: improvement.map(|i| 0.5 * (1.0 + i / 100.0)),
            improvement_percentage: improvement,
            best_version_id: None,
            iterations: 10,
            activated: false,
            duration_secs: Some(1.0),
            error_message: (status == TaskStatus::Failed).then(|| "boom".to_string()),
        }
    }

    #[test]
    fn aggregates_completed_tasks() {
        let report = TuningReport::from_outcomes(
            vec![
                outcome("hammer", TaskStatus::Completed, Some(30.0)),
                outcome("doji", TaskStatus::Completed, Some(20.0)),
            ],
            Utc::now(),
        );
        assert_eq!(report.total_tasks, 2);
        assert_eq!(report.success_rate, 100.0);
        assert_eq!(report.average_improvement, 25.0);
        assert_eq!(report.best_improvement, 30.0);
        assert_eq!(report.best_algorithm.as_deref(), Some("hammer"));
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("consider activating"));
    }

    #[test]
    fn failures_drive_recommendations() {
        let report = TuningReport::from_outcomes(
            vec![
                outcome("hammer", TaskStatus::Completed, Some(1.0)),
                outcome("doji", TaskStatus::Failed, None),
            ],
            Utc::now(),
        );
        assert_eq!(report.failed, 1);
        assert_eq!(report.success_rate, 50.0);
        assert!(report.recommendations.iter().any(|r| r.contains("investigate")));
        assert!(report.recommendations.iter().any(|r| r.contains("review the algorithms manually")));
        assert!(report.recommendations.iter().any(|r| r.contains("doji failed: boom")));
    }

    #[test]
    fn no_op_report() {
        let scores = BTreeMap::from([("hammer".to_string(), 0.9)]);
        let report = TuningReport::no_optimization_needed(scores, 0.6);
        assert_eq!(report.status, ReportStatus::NoOptimizationNeeded);
        assert_eq!(report.total_tasks, 0);
        assert_eq!(report.current_scores.len(), 1);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("no_optimization_needed"));
    }
}
