//! Optimization session audit log.

use chrono::Utc;
use duckdb::params;
use pf_types::{
    OptimizationMethod, OptimizationSession, PfResult, SessionOutcome, SessionStatus, StoreError,
    VersionId,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::schema::SESSION_COLUMNS;
use crate::store::{db_err, parse_time, VersionStore};

struct SessionRow {
    session_id: String,
    pattern_name: String,
    method: String,
    start_time: String,
    end_time: Option<String>,
    status: String,
    initial_version_id: Option<i64>,
    final_version_id: Option<i64>,
    iterations: i64,
    best_score: Option<f64>,
    improvement_percentage: Option<f64>,
    config_json: String,
    log_text: String,
    error_message: Option<String>,
}

impl SessionRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            pattern_name: row.get(1)?,
            method: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            status: row.get(5)?,
            initial_version_id: row.get(6)?,
            final_version_id: row.get(7)?,
            iterations: row.get(8)?,
            best_score: row.get(9)?,
            improvement_percentage: row.get(10)?,
            config_json: row.get(11)?,
            log_text: row.get(12)?,
            error_message: row.get(13)?,
        })
    }

    fn into_session(self) -> PfResult<OptimizationSession> {
        Ok(OptimizationSession {
            method: self.method.parse::<OptimizationMethod>()?,
            start_time: parse_time(&self.start_time)?,
            end_time: self.end_time.as_deref().map(parse_time).transpose()?,
            status: self.status.parse::<SessionStatus>()?,
            session_id: self.session_id,
            algorithm_key: self.pattern_name,
            initial_version_id: self.initial_version_id,
            final_version_id: self.final_version_id,
            iterations: self.iterations.max(0) as usize,
            best_score: self.best_score,
            improvement_percentage: self.improvement_percentage,
            config_json: self.config_json,
            log_text: self.log_text,
            error_message: self.error_message,
        })
    }
}

impl VersionStore {
    /// Open a session in `running` state and return its id.
    pub fn start_session(
        &self,
        algorithm_key: &str,
        method: OptimizationMethod,
        initial_version_id: Option<VersionId>,
        config_json: &str,
    ) -> PfResult<String> {
        let session_id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();

        let id: i64 = conn
            .query_row("SELECT nextval('optimization_logs_id_seq')", [], |row| row.get(0))
            .map_err(db_err("next session row id"))?;

        conn.execute(
            &format!(
                "INSERT INTO optimization_logs (id, {SESSION_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, NULL, ?, ?, NULL, 0, NULL, NULL, ?, '', NULL)"
            ),
            params![
                id,
                session_id,
                algorithm_key,
                method.as_str(),
                Utc::now().to_rfc3339(),
                SessionStatus::Running.as_str(),
                initial_version_id,
                config_json,
            ],
        )
        .map_err(db_err("insert session"))?;

        info!(session = %session_id, algorithm = algorithm_key, method = %method, "session started");
        Ok(session_id)
    }

    /// Mark a running session as completed.
    pub fn complete_session(&self, session_id: &str, outcome: &SessionOutcome) -> PfResult<()> {
        let conn = self.conn.lock();
        ensure_running(&conn, session_id)?;

        conn.execute(
            "UPDATE optimization_logs SET status = ?, end_time = ?, final_version_id = ?, \
             iterations = ?, best_score = ?, improvement_percentage = ?, log_text = ? \
             WHERE session_id = ?",
            params![
                SessionStatus::Completed.as_str(),
                Utc::now().to_rfc3339(),
                outcome.final_version_id,
                outcome.iterations as i64,
                outcome.best_score,
                outcome.improvement_percentage,
                outcome.log_text,
                session_id,
            ],
        )
        .map_err(db_err("complete session"))?;

        debug!(
            session = session_id,
            best = outcome.best_score,
            improvement = outcome.improvement_percentage,
            "session completed"
        );
        Ok(())
    }

    /// Mark a running session as failed with `error_message`.
    pub fn fail_session(&self, session_id: &str, error_message: &str) -> PfResult<()> {
        let conn = self.conn.lock();
        ensure_running(&conn, session_id)?;

        conn.execute(
            "UPDATE optimization_logs SET status = ?, end_time = ?, error_message = ? WHERE session_id = ?",
            params![
                SessionStatus::Failed.as_str(),
                Utc::now().to_rfc3339(),
                error_message,
                session_id,
            ],
        )
        .map_err(db_err("fail session"))?;

        debug!(session = session_id, error = error_message, "session failed");
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> PfResult<Option<OptimizationSession>> {
        let conn = self.conn.lock();
        match conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM optimization_logs WHERE session_id = ?"),
            params![session_id],
            SessionRow::from_row,
        ) {
            Ok(row) => Ok(Some(row.into_session()?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err("get session")(e).into()),
        }
    }

    /// Sessions, newest first, optionally for one algorithm only.
    pub fn list_sessions(
        &self,
        algorithm_key: Option<&str>,
        limit: usize,
    ) -> PfResult<Vec<OptimizationSession>> {
        let conn = self.conn.lock();
        let (filter, key) = match algorithm_key {
            Some(key) => ("WHERE pattern_name = ?", Some(key)),
            None => ("", None),
        };
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM optimization_logs {filter} ORDER BY id DESC LIMIT {limit}"
            ))
            .map_err(db_err("list sessions"))?;

        let rows = match key {
            Some(key) => stmt.query_map(params![key], SessionRow::from_row),
            None => stmt.query_map([], SessionRow::from_row),
        }
        .map_err(db_err("list sessions"))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(db_err("list sessions"))?.into_session()?);
        }
        Ok(sessions)
    }
}

fn ensure_running(conn: &duckdb::Connection, session_id: &str) -> PfResult<()> {
    let status: String = match conn.query_row(
        "SELECT status FROM optimization_logs WHERE session_id = ?",
        params![session_id],
        |row| row.get(0),
    ) {
        Ok(status) => status,
        Err(duckdb::Error::QueryReturnedNoRows) => {
            return Err(StoreError::SessionNotFound {
                session_id: session_id.to_string(),
            }
            .into())
        }
        Err(e) => return Err(db_err("session status")(e).into()),
    };

    if status.parse::<SessionStatus>()? != SessionStatus::Running {
        return Err(StoreError::SessionFinalized {
            session_id: session_id.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_data::InMemoryCatalog;
    use pf_types::PfError;
    use std::sync::Arc;

    fn store() -> VersionStore {
        VersionStore::in_memory(Arc::new(InMemoryCatalog::with_defaults())).unwrap()
    }

    fn outcome() -> SessionOutcome {
        SessionOutcome {
            final_version_id: None,
            iterations: 12,
            best_score: 0.61,
            improvement_percentage: 3.5,
            log_text: "done".to_string(),
        }
    }

    #[test]
    fn session_lifecycle() {
        let store = store();
        let id = store
            .start_session("hammer", OptimizationMethod::Genetic, None, "{}")
            .unwrap();

        let running = store.get_session(&id).unwrap().unwrap();
        assert_eq!(running.status, SessionStatus::Running);
        assert!(running.end_time.is_none());

        store.complete_session(&id, &outcome()).unwrap();
        let done = store.get_session(&id).unwrap().unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.iterations, 12);
        assert_eq!(done.best_score, Some(0.61));
        assert!(done.end_time.is_some());
    }

    #[test]
    fn finalized_sessions_cannot_change() {
        let store = store();
        let id = store
            .start_session("doji", OptimizationMethod::Random, None, "{}")
            .unwrap();
        store.fail_session(&id, "no datasets").unwrap();

        let err = store.complete_session(&id, &outcome()).unwrap_err();
        assert!(matches!(err, PfError::Store(StoreError::SessionFinalized { .. })));
        let session = store.get_session(&id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.error_message.as_deref(), Some("no datasets"));
    }

    #[test]
    fn unknown_session_is_reported() {
        let store = store();
        let err = store.fail_session("missing", "boom").unwrap_err();
        assert!(matches!(err, PfError::Store(StoreError::SessionNotFound { .. })));
        assert!(store.get_session("missing").unwrap().is_none());
    }

    #[test]
    fn sessions_are_listed_newest_first() {
        let store = store();
        let a = store.start_session("hammer", OptimizationMethod::Random, None, "{}").unwrap();
        let b = store.start_session("doji", OptimizationMethod::Random, None, "{}").unwrap();
        let c = store.start_session("hammer", OptimizationMethod::Gradient, None, "{}").unwrap();

        let all: Vec<String> = store.list_sessions(None, 10).unwrap().into_iter().map(|s| s.session_id).collect();
        assert_eq!(all, vec![c.clone(), b, a.clone()]);

        let hammer: Vec<String> = store
            .list_sessions(Some("hammer"), 10)
            .unwrap()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        assert_eq!(hammer, vec![c, a]);
    }
}
