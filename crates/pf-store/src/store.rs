//! Version store backed by DuckDB.
//!
//! Every statement goes through a single connection guarded by a mutex, so
//! writes are serialized; multi-step writes additionally run inside a
//! transaction and either apply fully or not at all.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use parking_lot::Mutex;
use pf_data::AlgorithmCatalog;
use pf_types::{
    AlgorithmConfig, AlgorithmVersion, MetricsRecord, OptimizationMethod, Parameters,
    PerformanceMetrics, PfError, PfResult, StoreError, VersionId,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::schema::{METRIC_COLUMNS, SCHEMA, VERSION_COLUMNS};

/// Version store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Versions kept per algorithm by retention cleanup (0 disables cleanup).
    pub max_versions_per_algorithm: usize,
    /// Recorded as `created_by` on new versions.
    pub created_by: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_versions_per_algorithm: 10,
            created_by: "patternforge".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_max_versions(mut self, n: usize) -> Self {
        self.max_versions_per_algorithm = n;
        self
    }

    pub fn with_created_by(mut self, who: &str) -> Self {
        self.created_by = who.to_string();
        self
    }
}

/// Durable, lineage-tracked store of algorithm versions
#[derive(Debug)]
pub struct VersionStore {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) catalog: Arc<dyn AlgorithmCatalog>,
    config: StoreConfig,
}

pub(crate) fn db_err(context: &'static str) -> impl Fn(duckdb::Error) -> StoreError {
    move |e| StoreError::QueryFailed {
        query: context.to_string(),
        error: e.to_string(),
    }
}

/// Raw `algorithm_versions` row before JSON/enum decoding
struct VersionRow {
    id: i64,
    pattern_name: String,
    version_number: i64,
    algorithm_code: String,
    parameters_json: String,
    created_time: String,
    created_by: String,
    description: String,
    is_active: bool,
    parent_version_id: Option<i64>,
    optimization_method: String,
}

impl VersionRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pattern_name: row.get(1)?,
            version_number: row.get(2)?,
            algorithm_code: row.get(3)?,
            parameters_json: row.get(4)?,
            created_time: row.get(5)?,
            created_by: row.get(6)?,
            description: row.get(7)?,
            is_active: row.get(8)?,
            parent_version_id: row.get(9)?,
            optimization_method: row.get(10)?,
        })
    }

    fn into_version(self) -> PfResult<AlgorithmVersion> {
        let parameters: Parameters =
            serde_json::from_str(&self.parameters_json).map_err(|e| StoreError::Corruption {
                message: format!("version {} parameters: {}", self.id, e),
            })?;
        let optimization_method: OptimizationMethod = self.optimization_method.parse()?;
        Ok(AlgorithmVersion {
            id: self.id,
            algorithm_key: self.pattern_name,
            version_number: self.version_number,
            code: self.algorithm_code,
            parameters,
            created_at: parse_time(&self.created_time)?,
            created_by: self.created_by,
            description: self.description,
            is_active: self.is_active,
            parent_version_id: self.parent_version_id,
            optimization_method,
        })
    }
}

pub(crate) fn parse_time(raw: &str) -> PfResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Corruption {
                message: format!("bad timestamp {raw}: {e}"),
            }
            .into()
        })
}

fn metrics_from_row(row: &duckdb::Row<'_>, offset: usize) -> duckdb::Result<PerformanceMetrics> {
    let count = |i: usize| -> duckdb::Result<u64> { Ok(row.get::<_, i64>(offset + i)?.max(0) as u64) };
    let value = |i: usize| -> duckdb::Result<f64> { row.get::<_, f64>(offset + i) };
    Ok(PerformanceMetrics {
        true_positives: count(0)?,
        false_positives: count(1)?,
        true_negatives: count(2)?,
        false_negatives: count(3)?,
        precision: value(4)?,
        recall: value(5)?,
        f1_score: value(6)?,
        accuracy: value(7)?,
        execution_time: value(8)?,
        memory_usage: value(9)?,
        cpu_usage: value(10)?,
        signal_quality: value(11)?,
        confidence_avg: value(12)?,
        confidence_std: value(13)?,
        patterns_found: count(14)?,
        robustness_score: value(15)?,
        parameter_sensitivity: value(16)?,
        overall_score: value(17)?,
    })
}

impl VersionStore {
    /// Open (or create) the store described by `config`.
    pub fn open(config: StoreConfig, catalog: Arc<dyn AlgorithmCatalog>) -> PfResult<Self> {
        let connection = match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(|e| StoreError::DatabaseConnection {
            message: e.to_string(),
        })?;

        connection
            .execute_batch(SCHEMA)
            .map_err(|e| StoreError::DatabaseConnection {
                message: e.to_string(),
            })?;

        info!(
            path = ?config.db_path,
            keep = config.max_versions_per_algorithm,
            "version store opened"
        );

        Ok(Self {
            conn: Mutex::new(connection),
            catalog,
            config,
        })
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn in_memory(catalog: Arc<dyn AlgorithmCatalog>) -> PfResult<Self> {
        Self::open(StoreConfig::in_memory(), catalog)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn AlgorithmCatalog> {
        &self.catalog
    }

    // ---- writes ----

    /// Insert a new, inactive version and return its id.
    ///
    /// The version number is one past the current maximum for
    /// `algorithm_key`. Retention cleanup runs afterwards; its failure is
    /// logged and does not affect the result.
    pub fn save_version(
        &self,
        algorithm_key: &str,
        code: &str,
        parameters: &Parameters,
        description: &str,
        method: OptimizationMethod,
        parent_version_id: Option<VersionId>,
    ) -> PfResult<VersionId> {
        let parameters_json = serde_json::to_string(parameters)?;

        let (version_id, version_number) = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction().map_err(db_err("begin save_version"))?;

            if let Some(parent_id) = parent_version_id {
                if fetch_version(&tx, parent_id)?.is_none() {
                    return Err(StoreError::MissingParent { parent_id }.into());
                }
            }

            let version_number: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(version_number), 0) + 1 FROM algorithm_versions WHERE pattern_name = ?",
                    params![algorithm_key],
                    |row| row.get(0),
                )
                .map_err(db_err("next version number"))?;

            let version_id: i64 = tx
                .query_row("SELECT nextval('algorithm_versions_id_seq')", [], |row| row.get(0))
                .map_err(db_err("next version id"))?;

            tx.execute(
                &format!("INSERT INTO algorithm_versions ({VERSION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, FALSE, ?, ?)"),
                params![
                    version_id,
                    algorithm_key,
                    version_number,
                    code,
                    parameters_json,
                    Utc::now().to_rfc3339(),
                    self.config.created_by,
                    description,
                    parent_version_id,
                    method.as_str(),
                ],
            )
            .map_err(db_err("insert version"))?;

            tx.commit().map_err(db_err("commit save_version"))?;
            (version_id, version_number)
        };

        info!(
            algorithm = algorithm_key,
            version_id,
            version_number,
            method = %method,
            "saved version"
        );

        if let Err(e) = self.cleanup_old_versions(algorithm_key) {
            warn!(algorithm = algorithm_key, "version cleanup failed: {}", e);
        }

        Ok(version_id)
    }

    /// Delete all but the newest `max_versions_per_algorithm` versions.
    ///
    /// The active version is never deleted, whatever its age.
    pub fn cleanup_old_versions(&self, algorithm_key: &str) -> PfResult<usize> {
        let keep = self.config.max_versions_per_algorithm;
        if keep == 0 {
            return Ok(0);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err("begin cleanup"))?;

        let cutoff: Option<i64> = match tx.query_row(
            &format!(
                "SELECT version_number FROM algorithm_versions WHERE pattern_name = ? \
                 ORDER BY version_number DESC LIMIT 1 OFFSET {}",
                keep - 1
            ),
            params![algorithm_key],
            |row| row.get(0),
        ) {
            Ok(n) => Some(n),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(db_err("cleanup cutoff")(e).into()),
        };

        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        tx.execute(
            "DELETE FROM performance_metrics WHERE version_id IN (\
                SELECT id FROM algorithm_versions \
                WHERE pattern_name = ? AND version_number < ? AND NOT is_active)",
            params![algorithm_key, cutoff],
        )
        .map_err(db_err("cleanup metrics"))?;

        let deleted = tx
            .execute(
                "DELETE FROM algorithm_versions WHERE pattern_name = ? AND version_number < ? AND NOT is_active",
                params![algorithm_key, cutoff],
            )
            .map_err(db_err("cleanup versions"))?;

        tx.commit().map_err(db_err("commit cleanup"))?;

        if deleted > 0 {
            debug!(algorithm = algorithm_key, deleted, cutoff, "cleaned up old versions");
        }
        Ok(deleted)
    }

    /// Make `version_id` the single active version of its algorithm and
    /// push its payload into the catalog.
    ///
    /// Returns false, with nothing changed, if the version does not exist or
    /// any step fails.
    pub fn activate_version(&self, version_id: VersionId) -> bool {
        match self.try_activate(version_id) {
            Ok(version) => {
                info!(
                    algorithm = %version.algorithm_key,
                    version_id,
                    version_number = version.version_number,
                    "activated version"
                );
                true
            }
            Err(e) => {
                warn!(version_id, "activation failed: {}", e);
                false
            }
        }
    }

    fn try_activate(&self, version_id: VersionId) -> PfResult<AlgorithmVersion> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err("begin activate"))?;

        let version = fetch_version(&tx, version_id)?
            .ok_or(StoreError::VersionNotFound { version_id })?;

        tx.execute(
            "UPDATE algorithm_versions SET is_active = FALSE WHERE pattern_name = ? AND is_active",
            params![version.algorithm_key],
        )
        .map_err(db_err("deactivate siblings"))?;

        tx.execute(
            "UPDATE algorithm_versions SET is_active = TRUE WHERE id = ?",
            params![version_id],
        )
        .map_err(db_err("activate version"))?;

        let previous = self.catalog.get(&version.algorithm_key);
        let applied = self
            .catalog
            .apply_version(&version.algorithm_key, &version.code, &version.parameters)
            .map_err(|e| {
                PfError::from(StoreError::CatalogUpdate {
                    message: e.to_string(),
                })
            })
            .and_then(|()| tx.commit().map_err(|e| db_err("commit activate")(e).into()));

        if let Err(e) = applied {
            // the transaction is rolled back, so the catalog has to be as well
            self.restore_catalog(&version.algorithm_key, previous);
            return Err(e);
        }

        Ok(AlgorithmVersion {
            is_active: true,
            ..version
        })
    }

    fn restore_catalog(&self, algorithm_key: &str, previous: Option<AlgorithmConfig>) {
        match previous {
            Some(config) => self.catalog.upsert(config),
            None => {
                self.catalog.remove(algorithm_key);
            }
        }
    }

    /// Activate the version numbered `version_number` of `algorithm_key`.
    pub fn rollback_to(&self, algorithm_key: &str, version_number: i64) -> bool {
        match self.resolve_version(algorithm_key, version_number) {
            Ok(version) => self.activate_version(version.id),
            Err(e) => {
                warn!(algorithm = algorithm_key, version_number, "rollback failed: {}", e);
                false
            }
        }
    }

    /// Delete an inactive version and its metrics.
    ///
    /// The active version cannot be deleted; activate another one first.
    pub fn delete_version(&self, version_id: VersionId) -> bool {
        match self.try_delete(version_id) {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(version_id, "delete failed: {}", e);
                false
            }
        }
    }

    fn try_delete(&self, version_id: VersionId) -> PfResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err("begin delete"))?;

        let Some(version) = fetch_version(&tx, version_id)? else {
            return Ok(false);
        };
        if version.is_active {
            info!(version_id, algorithm = %version.algorithm_key, "refusing to delete active version");
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM performance_metrics WHERE version_id = ?",
            params![version_id],
        )
        .map_err(db_err("delete metrics"))?;
        tx.execute("DELETE FROM algorithm_versions WHERE id = ?", params![version_id])
            .map_err(db_err("delete version"))?;
        tx.commit().map_err(db_err("commit delete"))?;

        info!(version_id, algorithm = %version.algorithm_key, "deleted version");
        Ok(true)
    }

    /// Copy a version into a new child version tagged `branch`.
    pub fn branch_version(&self, version_id: VersionId, description: &str) -> PfResult<VersionId> {
        let source = self
            .get_version(version_id)?
            .ok_or(StoreError::VersionNotFound { version_id })?;
        self.save_version(
            &source.algorithm_key,
            &source.code,
            &source.parameters,
            description,
            OptimizationMethod::Branch,
            Some(version_id),
        )
    }

    /// Re-apply every active version to the catalog (e.g. at process start).
    pub fn sync_catalog(&self) -> PfResult<usize> {
        let mut applied = 0;
        for key in self.list_algorithm_keys()? {
            if let Some(version) = self.get_active_version(&key)? {
                self.catalog
                    .apply_version(&key, &version.code, &version.parameters)?;
                applied += 1;
            }
        }
        debug!(applied, "catalog synchronized with active versions");
        Ok(applied)
    }

    // ---- reads ----

    pub fn get_version(&self, version_id: VersionId) -> PfResult<Option<AlgorithmVersion>> {
        let conn = self.conn.lock();
        fetch_version(&conn, version_id)
    }

    /// Versions of `algorithm_key`, newest first.
    pub fn get_versions(&self, algorithm_key: &str, limit: usize) -> PfResult<Vec<AlgorithmVersion>> {
        self.query_versions(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM algorithm_versions WHERE pattern_name = ? \
                 ORDER BY version_number DESC LIMIT {limit}"
            ),
            algorithm_key,
        )
    }

    pub fn get_active_version(&self, algorithm_key: &str) -> PfResult<Option<AlgorithmVersion>> {
        let mut found = self.query_versions(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM algorithm_versions \
                 WHERE pattern_name = ? AND is_active LIMIT 1"
            ),
            algorithm_key,
        )?;
        Ok(found.pop())
    }

    pub fn get_version_by_number(
        &self,
        algorithm_key: &str,
        version_number: i64,
    ) -> PfResult<Option<AlgorithmVersion>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM algorithm_versions WHERE pattern_name = ? AND version_number = ?"
        );
        match conn.query_row(&sql, params![algorithm_key, version_number], VersionRow::from_row) {
            Ok(row) => Ok(Some(row.into_version()?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err("version by number")(e).into()),
        }
    }

    /// Like [`Self::get_version_by_number`], but a missing version is a
    /// [`StoreError::VersionNumberNotFound`].
    pub fn resolve_version(&self, algorithm_key: &str, version_number: i64) -> PfResult<AlgorithmVersion> {
        self.get_version_by_number(algorithm_key, version_number)?
            .ok_or_else(|| {
                StoreError::VersionNumberNotFound {
                    algorithm_key: algorithm_key.to_string(),
                    version_number,
                }
                .into()
            })
    }

    /// Distinct algorithm keys that have at least one version.
    pub fn list_algorithm_keys(&self) -> PfResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT pattern_name FROM algorithm_versions ORDER BY pattern_name")
            .map_err(db_err("list keys"))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err("list keys"))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key.map_err(db_err("list keys"))?);
        }
        Ok(keys)
    }

    pub fn version_count(&self, algorithm_key: &str) -> PfResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM algorithm_versions WHERE pattern_name = ?",
                params![algorithm_key],
                |row| row.get(0),
            )
            .map_err(db_err("count versions"))?;
        Ok(count.max(0) as usize)
    }

    // ---- lineage ----

    /// Direct children of a version, oldest first.
    pub fn children(&self, version_id: VersionId) -> PfResult<Vec<AlgorithmVersion>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM algorithm_versions WHERE parent_version_id = ? \
                 ORDER BY version_number"
            ))
            .map_err(db_err("children"))?;
        let rows = stmt
            .query_map(params![version_id], VersionRow::from_row)
            .map_err(db_err("children"))?;
        collect_versions(rows)
    }

    /// The version itself followed by its ancestors up to the root.
    ///
    /// Stops at a parent that has since been removed by cleanup.
    pub fn ancestry(&self, version_id: VersionId) -> PfResult<Vec<AlgorithmVersion>> {
        let conn = self.conn.lock();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(version_id);
        while let Some(id) = cursor {
            if !seen.insert(id) {
                break;
            }
            match fetch_version(&conn, id)? {
                Some(version) => {
                    cursor = version.parent_version_id;
                    chain.push(version);
                }
                None => break,
            }
        }
        if chain.is_empty() {
            return Err(StoreError::VersionNotFound { version_id }.into());
        }
        Ok(chain)
    }

    // ---- metrics ----

    /// Append a metrics snapshot for a version. Existing rows are never updated.
    pub fn save_metrics(&self, version_id: VersionId, metrics: &PerformanceMetrics) -> PfResult<i64> {
        let conn = self.conn.lock();
        let version = fetch_version(&conn, version_id)?
            .ok_or(StoreError::VersionNotFound { version_id })?;

        let id: i64 = conn
            .query_row("SELECT nextval('performance_metrics_id_seq')", [], |row| row.get(0))
            .map_err(db_err("next metrics id"))?;

        conn.execute(
            &format!(
                "INSERT INTO performance_metrics (id, version_id, pattern_name, test_time, {METRIC_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                id,
                version_id,
                version.algorithm_key,
                Utc::now().to_rfc3339(),
                metrics.true_positives as i64,
                metrics.false_positives as i64,
                metrics.true_negatives as i64,
                metrics.false_negatives as i64,
                metrics.precision,
                metrics.recall,
                metrics.f1_score,
                metrics.accuracy,
                metrics.execution_time,
                metrics.memory_usage,
                metrics.cpu_usage,
                metrics.signal_quality,
                metrics.confidence_avg,
                metrics.confidence_std,
                metrics.patterns_found as i64,
                metrics.robustness_score,
                metrics.parameter_sensitivity,
                metrics.overall_score,
            ],
        )
        .map_err(db_err("insert metrics"))?;

        debug!(version_id, overall = metrics.overall_score, "saved metrics");
        Ok(id)
    }

    /// Most recent metrics snapshot of a version.
    pub fn latest_metrics(&self, version_id: VersionId) -> PfResult<Option<PerformanceMetrics>> {
        let conn = self.conn.lock();
        match conn.query_row(
            &format!(
                "SELECT {METRIC_COLUMNS} FROM performance_metrics WHERE version_id = ? \
                 ORDER BY id DESC LIMIT 1"
            ),
            params![version_id],
            |row| metrics_from_row(row, 0),
        ) {
            Ok(metrics) => Ok(Some(metrics)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err("latest metrics")(e).into()),
        }
    }

    /// Metrics snapshots across all versions of an algorithm, newest first.
    pub fn metrics_history(&self, algorithm_key: &str, limit: usize) -> PfResult<Vec<MetricsRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, version_id, pattern_name, test_time, {METRIC_COLUMNS} \
                 FROM performance_metrics WHERE pattern_name = ? ORDER BY id DESC LIMIT {limit}"
            ))
            .map_err(db_err("metrics history"))?;
        let rows = stmt
            .query_map(params![algorithm_key], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    metrics_from_row(row, 4)?,
                ))
            })
            .map_err(db_err("metrics history"))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, version_id, algorithm_key, test_time, metrics) =
                row.map_err(db_err("metrics history"))?;
            records.push(MetricsRecord {
                id,
                version_id,
                algorithm_key,
                test_time: parse_time(&test_time)?,
                metrics,
            });
        }
        Ok(records)
    }

    fn query_versions(&self, sql: &str, algorithm_key: &str) -> PfResult<Vec<AlgorithmVersion>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err("query versions"))?;
        let rows = stmt
            .query_map(params![algorithm_key], VersionRow::from_row)
            .map_err(db_err("query versions"))?;
        collect_versions(rows)
    }
}

fn collect_versions<I>(rows: I) -> PfResult<Vec<AlgorithmVersion>>
where
    I: Iterator<Item = duckdb::Result<VersionRow>>,
{
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row.map_err(db_err("read version row"))?.into_version()?);
    }
    Ok(versions)
}

pub(crate) fn fetch_version(conn: &Connection, version_id: VersionId) -> PfResult<Option<AlgorithmVersion>> {
    match conn.query_row(
        &format!("SELECT {VERSION_COLUMNS} FROM algorithm_versions WHERE id = ?"),
        params![version_id],
        VersionRow::from_row,
    ) {
        Ok(row) => Ok(Some(row.into_version()?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(db_err("fetch version")(e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_data::InMemoryCatalog;
    use pf_types::{parameters, ParamValue};
    use tempfile::tempdir;

    fn store() -> VersionStore {
        VersionStore::in_memory(Arc::new(InMemoryCatalog::with_defaults())).unwrap()
    }

    fn save(store: &VersionStore, key: &str, threshold: f64, parent: Option<VersionId>) -> VersionId {
        store
            .save_version(
                key,
                &format!("threshold = {threshold}"),
                &parameters([("threshold", threshold)]),
                "test version",
                OptimizationMethod::Manual,
                parent,
            )
            .unwrap()
    }

    #[test]
    fn version_numbers_start_at_one_and_increase() {
        let store = store();
        for expected in 1..=4 {
            let id = save(&store, "hammer", 0.5, None);
            let version = store.get_version(id).unwrap().unwrap();
            assert_eq!(version.version_number, expected);
            assert!(!version.is_active);
        }
        // numbering is per algorithm
        let id = save(&store, "doji", 0.5, None);
        assert_eq!(store.get_version(id).unwrap().unwrap().version_number, 1);
    }

    #[test]
    fn get_versions_is_newest_first_and_limited() {
        let store = store();
        for _ in 0..5 {
            save(&store, "hammer", 0.5, None);
        }
        let versions = store.get_versions("hammer", 3).unwrap();
        let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![5, 4, 3]);
    }

    #[test]
    fn activation_keeps_a_single_active_version() {
        let store = store();
        let ids: Vec<VersionId> = (0..3).map(|i| save(&store, "hammer", 0.5 + i as f64 * 0.1, None)).collect();

        for id in [ids[0], ids[2], ids[1], ids[1]] {
            assert!(store.activate_version(id));
            let active: Vec<_> = store
                .get_versions("hammer", 10)
                .unwrap()
                .into_iter()
                .filter(|v| v.is_active)
                .collect();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].id, id);
        }
    }

    #[test]
    fn activation_propagates_to_catalog() {
        let catalog = Arc::new(InMemoryCatalog::with_defaults());
        let store = VersionStore::in_memory(catalog.clone()).unwrap();
        let id = save(&store, "hammer", 0.9, None);

        assert!(store.activate_version(id));
        let live = catalog.get("hammer").unwrap();
        assert_eq!(live.parameters.get("threshold"), Some(&ParamValue::Float(0.9)));
        assert_eq!(live.code, "threshold = 0.9");
    }

    #[test]
    fn activating_missing_version_fails_without_side_effects() {
        let store = store();
        let id = save(&store, "hammer", 0.5, None);
        assert!(store.activate_version(id));
        assert!(!store.activate_version(9_999));
        assert_eq!(store.get_active_version("hammer").unwrap().unwrap().id, id);
    }

    /// Catalog that records `apply_version` calls and can fail after
    /// writing, leaving a half-applied entry behind.
    #[derive(Debug)]
    struct RecordingCatalog {
        inner: InMemoryCatalog,
        applied: Mutex<Vec<String>>,
        fail_after_apply: bool,
    }

    impl RecordingCatalog {
        fn new(fail_after_apply: bool) -> Self {
            Self {
                inner: InMemoryCatalog::with_defaults(),
                applied: Mutex::new(Vec::new()),
                fail_after_apply,
            }
        }
    }

    impl AlgorithmCatalog for RecordingCatalog {
        fn get(&self, algorithm_key: &str) -> Option<AlgorithmConfig> {
            self.inner.get(algorithm_key)
        }

        fn list(&self) -> Vec<AlgorithmConfig> {
            self.inner.list()
        }

        fn upsert(&self, config: AlgorithmConfig) {
            self.inner.upsert(config)
        }

        fn remove(&self, algorithm_key: &str) -> Option<AlgorithmConfig> {
            self.inner.remove(algorithm_key)
        }

        fn apply_version(&self, algorithm_key: &str, code: &str, parameters: &Parameters) -> PfResult<()> {
            self.applied.lock().push(algorithm_key.to_string());
            self.inner.apply_version(algorithm_key, code, parameters)?;
            if self.fail_after_apply {
                return Err(StoreError::CatalogUpdate {
                    message: "downstream refresh failed".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    #[test]
    fn failed_catalog_update_rolls_activation_back() {
        let catalog = Arc::new(RecordingCatalog::new(true));
        let store = VersionStore::in_memory(catalog.clone()).unwrap();
        let hammer = save(&store, "hammer", 0.9, None);
        let custom = save(&store, "custom_pattern", 0.3, None);
        let before = catalog.get("hammer").unwrap();

        assert!(!store.activate_version(hammer));
        assert!(!store.activate_version(custom));

        assert_eq!(*catalog.applied.lock(), vec!["hammer", "custom_pattern"]);
        // known entry restored, entry created by the failed activation removed
        assert_eq!(catalog.get("hammer").unwrap(), before);
        assert!(catalog.get("custom_pattern").is_none());
        assert!(store.get_active_version("hammer").unwrap().is_none());
        assert!(store.get_active_version("custom_pattern").unwrap().is_none());
    }

    #[test]
    fn successful_activation_applies_once() {
        let catalog = Arc::new(RecordingCatalog::new(false));
        let store = VersionStore::in_memory(catalog.clone()).unwrap();
        let id = save(&store, "hammer", 0.9, None);

        assert!(store.activate_version(id));
        assert_eq!(*catalog.applied.lock(), vec!["hammer"]);
        assert_eq!(catalog.get("hammer").unwrap().code, "threshold = 0.9");
    }

    #[test]
    fn resolve_version_reports_missing_numbers() {
        let store = store();
        save(&store, "hammer", 0.4, None);
        assert_eq!(store.resolve_version("hammer", 1).unwrap().version_number, 1);

        let err = store.resolve_version("hammer", 7).unwrap_err();
        assert!(matches!(
            err,
            PfError::Store(StoreError::VersionNumberNotFound { version_number: 7, .. })
        ));
    }

    #[test]
    fn rollback_is_idempotent() {
        let catalog = Arc::new(InMemoryCatalog::with_defaults());
        let store = VersionStore::in_memory(catalog.clone()).unwrap();
        save(&store, "hammer", 0.4, None);
        save(&store, "hammer", 0.6, None);

        assert!(store.rollback_to("hammer", 1));
        let first_active = store.get_active_version("hammer").unwrap().unwrap();
        let first_config = catalog.get("hammer").unwrap();

        assert!(store.rollback_to("hammer", 1));
        assert_eq!(store.get_active_version("hammer").unwrap().unwrap(), first_active);
        assert_eq!(catalog.get("hammer").unwrap(), first_config);
        assert_eq!(first_active.version_number, 1);

        assert!(!store.rollback_to("hammer", 42));
    }

    #[test]
    fn active_version_cannot_be_deleted() {
        let store = store();
        let id = save(&store, "hammer", 0.5, None);
        assert!(store.activate_version(id));
        let before = store.get_version(id).unwrap().unwrap();

        assert!(!store.delete_version(id));
        assert_eq!(store.get_version(id).unwrap().unwrap(), before);
    }

    #[test]
    fn inactive_version_and_its_metrics_are_deleted() {
        let store = store();
        let id = save(&store, "hammer", 0.5, None);
        store.save_metrics(id, &PerformanceMetrics::default()).unwrap();

        assert!(store.delete_version(id));
        assert!(store.get_version(id).unwrap().is_none());
        assert!(store.metrics_history("hammer", 10).unwrap().is_empty());
        assert!(!store.delete_version(id));
    }

    #[test]
    fn cleanup_keeps_latest_and_active() {
        let catalog = Arc::new(InMemoryCatalog::with_defaults());
        let store = VersionStore::open(StoreConfig::in_memory().with_max_versions(3), catalog).unwrap();

        let first = save(&store, "hammer", 0.1, None);
        assert!(store.activate_version(first));
        for i in 0..5 {
            save(&store, "hammer", 0.2 + i as f64 * 0.1, None);
        }

        let numbers: Vec<i64> = store
            .get_versions("hammer", 100)
            .unwrap()
            .iter()
            .map(|v| v.version_number)
            .collect();
        assert_eq!(numbers, vec![6, 5, 4, 1]);
        assert!(store.get_version(first).unwrap().unwrap().is_active);
    }

    #[test]
    fn lineage_links_parent_and_children() {
        let store = store();
        let root = save(&store, "hammer", 0.5, None);
        let child = save(&store, "hammer", 0.6, Some(root));
        let grandchild = store.branch_version(child, "experiment").unwrap();

        let children = store.children(root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child);

        let chain: Vec<VersionId> = store.ancestry(grandchild).unwrap().iter().map(|v| v.id).collect();
        assert_eq!(chain, vec![grandchild, child, root]);

        let branched = store.get_version(grandchild).unwrap().unwrap();
        assert_eq!(branched.optimization_method, OptimizationMethod::Branch);
        assert_eq!(branched.parameters, store.get_version(child).unwrap().unwrap().parameters);
    }

    #[test]
    fn child_of_missing_parent_is_rejected() {
        let store = store();
        assert!(store
            .save_version("hammer", "", &Parameters::new(), "", OptimizationMethod::Manual, Some(77))
            .is_err());
        assert_eq!(store.version_count("hammer").unwrap(), 0);
    }

    #[test]
    fn latest_metrics_wins() {
        let store = store();
        let id = save(&store, "hammer", 0.5, None);
        assert!(store.latest_metrics(id).unwrap().is_none());

        let first = PerformanceMetrics { overall_score: 0.4, patterns_found: 3, ..Default::default() };
        let second = PerformanceMetrics { overall_score: 0.7, patterns_found: 5, ..Default::default() };
        store.save_metrics(id, &first).unwrap();
        store.save_metrics(id, &second).unwrap();

        assert_eq!(store.latest_metrics(id).unwrap().unwrap(), second);
        assert_eq!(store.metrics_history("hammer", 10).unwrap().len(), 2);
    }

    #[test]
    fn store_persists_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("versions.duckdb");
        let catalog: Arc<dyn AlgorithmCatalog> = Arc::new(InMemoryCatalog::with_defaults());

        let id = {
            let store = VersionStore::open(StoreConfig::default().with_db_path(&path), catalog.clone()).unwrap();
            let id = save(&store, "doji", 0.3, None);
            assert!(store.activate_version(id));
            id
        };

        let fresh_catalog = Arc::new(InMemoryCatalog::with_defaults());
        let store = VersionStore::open(StoreConfig::default().with_db_path(&path), fresh_catalog.clone()).unwrap();
        assert_eq!(store.get_active_version("doji").unwrap().unwrap().id, id);
        assert_eq!(store.sync_catalog().unwrap(), 1);
        assert_eq!(
            fresh_catalog.get("doji").unwrap().parameters.get("threshold"),
            Some(&ParamValue::Float(0.3))
        );
        assert_eq!(store.list_algorithm_keys().unwrap(), vec!["doji".to_string()]);
    }
}
