use super::{decode_state, ensure_session_matches, CheckpointError, CheckpointStore};
use crate::orchestration::state::WorkflowState;
use crate::shared::{ReportId, SessionId};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Process-local store. States are kept serialized so reads go through the
/// same decode path as the durable backends.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<BTreeMap<SessionId, String>>,
    reports: Mutex<BTreeMap<ReportId, SessionId>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn put(&self, session_id: &SessionId, state: &WorkflowState) -> Result<(), CheckpointError> {
        ensure_session_matches(session_id, state)?;
        let encoded = serde_json::to_string(state).map_err(|source| CheckpointError::Json {
            path: format!("memory:{session_id}"),
            source,
        })?;
        self.checkpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.clone(), encoded);
        Ok(())
    }

    fn get(&self, session_id: &SessionId) -> Result<Option<WorkflowState>, CheckpointError> {
        let raw = self
            .checkpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned();
        raw.map(|raw| decode_state(session_id, &raw)).transpose()
    }

    fn bind_report(
        &self,
        report_id: &ReportId,
        session_id: &SessionId,
    ) -> Result<(), CheckpointError> {
        self.reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(report_id.clone(), session_id.clone());
        Ok(())
    }

    fn session_for_report(
        &self,
        report_id: &ReportId,
    ) -> Result<Option<SessionId>, CheckpointError> {
        Ok(self
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(report_id)
            .cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
