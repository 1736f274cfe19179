//! DuckDB schema for versions, metrics and optimization logs.

pub(crate) const SCHEMA: &str = "
    CREATE SEQUENCE IF NOT EXISTS algorithm_versions_id_seq START 1;
    CREATE SEQUENCE IF NOT EXISTS performance_metrics_id_seq START 1;
    CREATE SEQUENCE IF NOT EXISTS optimization_logs_id_seq START 1;

    CREATE TABLE IF NOT EXISTS algorithm_versions (
        id BIGINT PRIMARY KEY,
        pattern_name TEXT NOT NULL,
        version_number BIGINT NOT NULL,
        algorithm_code TEXT NOT NULL,
        parameters_json TEXT NOT NULL,
        created_time TEXT NOT NULL,
        created_by TEXT NOT NULL,
        description TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT FALSE,
        parent_version_id BIGINT,
        optimization_method TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_algorithm_versions_pattern ON algorithm_versions(pattern_name);

    CREATE TABLE IF NOT EXISTS performance_metrics (
        id BIGINT PRIMARY KEY,
        version_id BIGINT NOT NULL,
        pattern_name TEXT NOT NULL,
        test_time TEXT NOT NULL,
        true_positives BIGINT NOT NULL,
        false_positives BIGINT NOT NULL,
        true_negatives BIGINT NOT NULL,
        false_negatives BIGINT NOT NULL,
        precision_score DOUBLE NOT NULL,
        recall_score DOUBLE NOT NULL,
        f1_score DOUBLE NOT NULL,
        accuracy_score DOUBLE NOT NULL,
        execution_time DOUBLE NOT NULL,
        memory_usage DOUBLE NOT NULL,
        cpu_usage DOUBLE NOT NULL,
        signal_quality DOUBLE NOT NULL,
        confidence_avg DOUBLE NOT NULL,
        confidence_std DOUBLE NOT NULL,
        patterns_found BIGINT NOT NULL,
        robustness_score DOUBLE NOT NULL,
        parameter_sensitivity DOUBLE NOT NULL,
        overall_score DOUBLE NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_performance_metrics_version ON performance_metrics(version_id);

    CREATE TABLE IF NOT EXISTS optimization_logs (
        id BIGINT PRIMARY KEY,
        pattern_name TEXT NOT NULL,
        session_id TEXT NOT NULL,
        method TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT,
        status TEXT NOT NULL,
        initial_version_id BIGINT,
        final_version_id BIGINT,
        iterations BIGINT NOT NULL DEFAULT 0,
        best_score DOUBLE,
        improvement_percentage DOUBLE,
        config_json TEXT NOT NULL,
        log_text TEXT NOT NULL,
        error_message TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_optimization_logs_pattern ON optimization_logs(pattern_name);
";

pub(crate) const VERSION_COLUMNS: &str = "id, pattern_name, version_number, algorithm_code, \
     parameters_json, created_time, created_by, description, is_active, parent_version_id, \
     optimization_method";

pub(crate) const METRIC_COLUMNS: &str = "true_positives, false_positives, true_negatives, \
     false_negatives, precision_score, recall_score, f1_score, accuracy_score, execution_time, \
     memory_usage, cpu_usage, signal_quality, confidence_avg, confidence_std, patterns_found, \
     robustness_score, parameter_sensitivity, overall_score";

pub(crate) const SESSION_COLUMNS: &str = "session_id, pattern_name, method, start_time, end_time, \
     status, initial_version_id, final_version_id, iterations, best_score, \
     improvement_percentage, config_json, log_text, error_message";
