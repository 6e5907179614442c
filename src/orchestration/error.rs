use crate::orchestration::checkpoint::CheckpointError;
use crate::orchestration::session_lock::LockError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("no session is bound to report `{report_id}`")]
    UnknownReport { report_id: String },
    #[error("session `{session_id}` has no checkpoint")]
    UnknownSession { session_id: String },
    #[error("workflow for session `{session_id}` exceeded {max_ticks} ticks")]
    TickLimitExceeded { session_id: String, max_ticks: u32 },
    /// Another run owns the session. `holder` is the owning pid when known.
    #[error("session `{session_id}` is busy with another run")]
    SessionBusy {
        session_id: String,
        holder: Option<u32>,
    },
    #[error("session lock io error at {path}: {source}")]
    SessionLock {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<LockError> for WorkflowError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Busy { session_id, holder } => Self::SessionBusy { session_id, holder },
            LockError::Io { path, source } => Self::SessionLock { path, source },
        }
    }
}
