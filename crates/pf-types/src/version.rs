use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::algorithm::Parameters;
use crate::errors::{OptimizationError, PfError};

/// Store-assigned version identifier.
pub type VersionId = i64;

/// How a version came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMethod {
    Manual,
    Genetic,
    Bayesian,
    Random,
    Gradient,
    Import,
    Branch,
}

impl OptimizationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Genetic => "genetic",
            Self::Bayesian => "bayesian",
            Self::Random => "random",
            Self::Gradient => "gradient",
            Self::Import => "import",
            Self::Branch => "branch",
        }
    }

    /// Methods that correspond to a search strategy.
    pub fn is_search(&self) -> bool {
        matches!(
            self,
            Self::Genetic | Self::Bayesian | Self::Random | Self::Gradient
        )
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationMethod {
    type Err = PfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "genetic" => Ok(Self::Genetic),
            "bayesian" => Ok(Self::Bayesian),
            "random" => Ok(Self::Random),
            "gradient" => Ok(Self::Gradient),
            "import" => Ok(Self::Import),
            "branch" => Ok(Self::Branch),
            other => Err(OptimizationError::UnknownMethod {
                method: other.to_string(),
            }
            .into()),
        }
    }
}

/// Immutable snapshot of an algorithm's code and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmVersion {
    pub id: VersionId,
    pub algorithm_key: String,
    pub version_number: i64,
    pub code: String,
    pub parameters: Parameters,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub description: String,
    pub is_active: bool,
    pub parent_version_id: Option<VersionId>,
    pub optimization_method: OptimizationMethod,
}

/// Lifecycle of an optimization session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = PfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PfError::Validation(format!("unknown session status: {other}"))),
        }
    }
}

/// Audit record spanning one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSession {
    pub session_id: String,
    pub algorithm_key: String,
    pub method: OptimizationMethod,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub initial_version_id: Option<VersionId>,
    pub final_version_id: Option<VersionId>,
    pub iterations: usize,
    pub best_score: Option<f64>,
    pub improvement_percentage: Option<f64>,
    pub config_json: String,
    pub log_text: String,
    pub error_message: Option<String>,
}

/// Fields written when a session finishes successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub final_version_id: Option<VersionId>,
    pub iterations: usize,
    pub best_score: f64,
    pub improvement_percentage: f64,
    pub log_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!(
            "Genetic".parse::<OptimizationMethod>().unwrap(),
            OptimizationMethod::Genetic
        );
        assert_eq!(
            " random ".parse::<OptimizationMethod>().unwrap(),
            OptimizationMethod::Random
        );
        assert!("annealing".parse::<OptimizationMethod>().is_err());
    }

    #[test]
    fn method_serializes_lowercase() {
        let json = serde_json::to_string(&OptimizationMethod::Bayesian).unwrap();
        assert_eq!(json, "\"bayesian\"");
        assert!(OptimizationMethod::Gradient.is_search());
        assert!(!OptimizationMethod::Import.is_search());
    }
}
