use super::{decode_state, ensure_session_matches, io_error, json_error, CheckpointError, CheckpointStore};
use crate::orchestration::state::WorkflowState;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::{now_secs, ReportId, SessionId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportBinding {
    report_id: ReportId,
    session_id: SessionId,
    bound_at: i64,
}

/// One JSON document per session under `<state_root>/sessions`, written
/// atomically so a crash leaves either the old or the new checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    state_root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            state_root: state_root.into(),
        }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_root.join("sessions")
    }

    pub fn report_index_dir(&self) -> PathBuf {
        self.state_root.join("index/reports")
    }

    pub fn session_path(&self, session_id: &SessionId) -> PathBuf {
        self.sessions_dir().join(format!("{session_id}.json"))
    }

    fn report_path(&self, report_id: &ReportId) -> PathBuf {
        self.report_index_dir().join(format!("{report_id}.json"))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, CheckpointError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn put(&self, session_id: &SessionId, state: &WorkflowState) -> Result<(), CheckpointError> {
        ensure_session_matches(session_id, state)?;
        let path = self.session_path(session_id);
        let encoded = serde_json::to_vec_pretty(state).map_err(|err| json_error(&path, err))?;
        atomic_write_file(&path, &encoded).map_err(|err| io_error(&path, err))
    }

    fn get(&self, session_id: &SessionId) -> Result<Option<WorkflowState>, CheckpointError> {
        let path = self.session_path(session_id);
        match read_optional(&path)? {
            Some(raw) => decode_state(session_id, &raw).map(Some),
            None => Ok(None),
        }
    }

    fn bind_report(
        &self,
        report_id: &ReportId,
        session_id: &SessionId,
    ) -> Result<(), CheckpointError> {
        let path = self.report_path(report_id);
        let binding = ReportBinding {
            report_id: report_id.clone(),
            session_id: session_id.clone(),
            bound_at: now_secs(),
        };
        let encoded = serde_json::to_vec_pretty(&binding).map_err(|err| json_error(&path, err))?;
        atomic_write_file(&path, &encoded).map_err(|err| io_error(&path, err))
    }

    fn session_for_report(
        &self,
        report_id: &ReportId,
    ) -> Result<Option<SessionId>, CheckpointError> {
        let path = self.report_path(report_id);
        let Some(raw) = read_optional(&path)? else {
            return Ok(None);
        };
        let binding: ReportBinding =
            serde_json::from_str(&raw).map_err(|err| json_error(&path, err))?;
        Ok(Some(binding.session_id))
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
