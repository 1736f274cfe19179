use thiserror::Error;

/// Main error type for the PatternForge system
#[derive(Error, Debug)]
pub enum PfError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Optimization error: {0}")]
    Optimization(#[from] OptimizationError),

    #[error("Tuning error: {0}")]
    Tuning(#[from] TuningError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Version store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    DatabaseConnection { message: String },

    #[error("Query execution failed: {query}, error: {error}")]
    QueryFailed { query: String, error: String },

    #[error("Version not found: {version_id}")]
    VersionNotFound { version_id: i64 },

    #[error("Version {version_number} not found for algorithm {algorithm_key}")]
    VersionNumberNotFound {
        algorithm_key: String,
        version_number: i64,
    },

    #[error("Parent version {parent_id} does not exist")]
    MissingParent { parent_id: i64 },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} is already finalized")]
    SessionFinalized { session_id: String },

    #[error("Unsupported export format version: {format_version}")]
    UnsupportedFormat { format_version: String },

    #[error("Corrupted record: {message}")]
    Corruption { message: String },

    #[error("Catalog update failed: {message}")]
    CatalogUpdate { message: String },
}

/// Errors raised while running a recognizer over a dataset
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Unknown algorithm: {algorithm_key}")]
    UnknownAlgorithm { algorithm_key: String },

    #[error("Invalid parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Recognizer failed: {message}")]
    RecognizerFailed { message: String },

    #[error("Recognizer panicked: {message}")]
    RecognizerPanicked { message: String },

    #[error("Dataset unavailable: {message}")]
    DatasetUnavailable { message: String },
}

/// Errors raised by an optimization run
#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error("Unknown optimization method: {method}")]
    UnknownMethod { method: String },

    #[error("Unknown target metric: {metric}")]
    UnknownMetric { metric: String },

    #[error("Invalid optimization configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Algorithm not found in catalog: {algorithm_key}")]
    AlgorithmNotFound { algorithm_key: String },

    #[error("No datasets available for {algorithm_key}")]
    NoDatasets { algorithm_key: String },
}

/// Scheduler errors
#[derive(Error, Debug)]
pub enum TuningError {
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task {task_id} panicked: {message}")]
    TaskPanicked { task_id: String, message: String },

    #[error("Worker pool failure: {message}")]
    WorkerPool { message: String },
}

/// Result type alias for PatternForge operations
pub type PfResult<T> = Result<T, PfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::VersionNumberNotFound {
            algorithm_key: "hammer".to_string(),
            version_number: 7,
        };

        assert!(error.to_string().contains("hammer"));
        assert!(error.to_string().contains('7'));
    }

    #[test]
    fn test_error_conversion() {
        let store_error = StoreError::VersionNotFound { version_id: 3 };
        let pf_error: PfError = store_error.into();

        match pf_error {
            PfError::Store(_) => (),
            _ => panic!("Expected Store error"),
        }
    }
}
