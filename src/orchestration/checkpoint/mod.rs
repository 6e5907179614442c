//! Durable per-session checkpoints plus the report-id correlation index used
//! to route acknowledgments back to the session that produced the report.

mod file;
mod memory;
mod sqlite;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use crate::config::{CheckpointBackend, Settings};
use crate::orchestration::state::WorkflowState;
use crate::shared::{ReportId, SessionId};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("checkpoint for session `{session_id}` is corrupt: {reason}")]
    Corrupt { session_id: String, reason: String },
    #[error("checkpoint session mismatch: expected {expected}, got {actual}")]
    SessionMismatch { expected: String, actual: String },
}

/// Keyed persistence of whole workflow states. `put` fully replaces the
/// previous checkpoint for the session.
pub trait CheckpointStore: Send + Sync {
    fn put(&self, session_id: &SessionId, state: &WorkflowState) -> Result<(), CheckpointError>;

    fn get(&self, session_id: &SessionId) -> Result<Option<WorkflowState>, CheckpointError>;

    fn bind_report(&self, report_id: &ReportId, session_id: &SessionId)
        -> Result<(), CheckpointError>;

    fn session_for_report(&self, report_id: &ReportId)
        -> Result<Option<SessionId>, CheckpointError>;

    fn backend_name(&self) -> &'static str;
}

pub fn open_checkpoint_store(settings: &Settings) -> Result<Box<dyn CheckpointStore>, CheckpointError> {
    match settings.checkpoint.backend {
        CheckpointBackend::File => Ok(Box::new(FileCheckpointStore::new(&settings.state_root))),
        CheckpointBackend::Sqlite => Ok(Box::new(SqliteCheckpointStore::open(
            &settings.checkpoint_db_path(),
        )?)),
    }
}

pub(crate) fn ensure_session_matches(
    session_id: &SessionId,
    state: &WorkflowState,
) -> Result<(), CheckpointError> {
    if &state.session_id == session_id {
        return Ok(());
    }
    Err(CheckpointError::SessionMismatch {
        expected: session_id.to_string(),
        actual: state.session_id.to_string(),
    })
}

pub(crate) fn decode_state(
    session_id: &SessionId,
    raw: &str,
) -> Result<WorkflowState, CheckpointError> {
    let state: WorkflowState =
        serde_json::from_str(raw).map_err(|err| CheckpointError::Corrupt {
            session_id: session_id.to_string(),
            reason: err.to_string(),
        })?;
    ensure_session_matches(session_id, &state)?;
    Ok(state)
}

fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn json_error(path: &Path, source: serde_json::Error) -> CheckpointError {
    CheckpointError::Json {
        path: path.display().to_string(),
        source,
    }
}
