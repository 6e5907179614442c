use super::{decode_state, ensure_session_matches, CheckpointError, CheckpointStore};
use crate::orchestration::state::WorkflowState;
use crate::shared::{now_secs, ReportId, SessionId};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteCheckpointStore {
    db_path: PathBuf,
}

impl SqliteCheckpointStore {
    pub fn open(db_path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), CheckpointError> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS report_sessions (
                report_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                bound_at INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|source| CheckpointError::Sql { source })
    }

    fn connect(&self) -> Result<Connection, CheckpointError> {
        let conn = Connection::open(&self.db_path).map_err(|source| CheckpointError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|source| CheckpointError::Sql { source })?;
        Ok(conn)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn put(&self, session_id: &SessionId, state: &WorkflowState) -> Result<(), CheckpointError> {
        ensure_session_matches(session_id, state)?;
        let encoded = serde_json::to_string(state).map_err(|source| CheckpointError::Json {
            path: self.db_path.display().to_string(),
            source,
        })?;
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO checkpoints (session_id, state, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET state = excluded.state, updated_at = excluded.updated_at",
            params![session_id.as_str(), encoded, state.updated_at],
        )
        .map_err(|source| CheckpointError::Sql { source })?;
        Ok(())
    }

    fn get(&self, session_id: &SessionId) -> Result<Option<WorkflowState>, CheckpointError> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state FROM checkpoints WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| CheckpointError::Sql { source })?;
        raw.map(|raw| decode_state(session_id, &raw)).transpose()
    }

    fn bind_report(
        &self,
        report_id: &ReportId,
        session_id: &SessionId,
    ) -> Result<(), CheckpointError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO report_sessions (report_id, session_id, bound_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(report_id) DO UPDATE SET session_id = excluded.session_id, bound_at = excluded.bound_at",
            params![report_id.as_str(), session_id.as_str(), now_secs()],
        )
        .map_err(|source| CheckpointError::Sql { source })?;
        Ok(())
    }

    fn session_for_report(
        &self,
        report_id: &ReportId,
    ) -> Result<Option<SessionId>, CheckpointError> {
        let conn = self.connect()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT session_id FROM report_sessions WHERE report_id = ?1",
                params![report_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| CheckpointError::Sql { source })?;
        raw.map(|raw| {
            SessionId::parse(&raw).map_err(|reason| CheckpointError::Corrupt {
                session_id: raw.clone(),
                reason,
            })
        })
        .transpose()
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
