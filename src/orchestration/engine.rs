use crate::collaborators::{Collaborators, ScanCredentials};
use crate::config::Settings;
use crate::orchestration::checkpoint::CheckpointStore;
use crate::orchestration::error::WorkflowError;
use crate::orchestration::events::{ProgressObserver, StepEvents};
use crate::orchestration::graph::node_spec;
use crate::orchestration::merge::merge_delta;
use crate::orchestration::node::{Next, NodeId};
use crate::orchestration::router::route_entry;
use crate::orchestration::session_lock::SessionLocks;
use crate::orchestration::state::{ProgressEntry, RequestInput, WorkflowState};
use crate::orchestration::steps::StepContext;
use crate::shared::{ReportId, SessionId};

/// Upper bound on ticks per inbound input. The longest path through the
/// graph is four nodes, so hitting this means routing is broken.
pub const MAX_TICKS_PER_INPUT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Reached the terminal node with no acknowledgment outstanding.
    Completed,
    /// Parked until an approval or an acknowledgment arrives.
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: WorkflowState,
}

impl RunOutcome {
    fn from_state(state: WorkflowState) -> Self {
        let status = if state.awaiting_acknowledgment {
            RunStatus::Suspended
        } else {
            RunStatus::Completed
        };
        Self { status, state }
    }
}

pub struct WorkflowEngine {
    settings: Settings,
    collaborators: Collaborators,
    store: Box<dyn CheckpointStore>,
    credentials: ScanCredentials,
    observer: Option<Box<dyn ProgressObserver>>,
    locks: SessionLocks,
}

impl WorkflowEngine {
    pub fn new(
        settings: Settings,
        collaborators: Collaborators,
        store: Box<dyn CheckpointStore>,
    ) -> Self {
        let credentials = ScanCredentials {
            user: settings.scan.ssh_user.clone(),
            password: None,
        };
        let locks = SessionLocks::new(settings.sessions_dir());
        Self {
            settings,
            collaborators,
            store,
            credentials,
            observer: None,
            locks,
        }
    }

    pub fn with_credentials(mut self, credentials: ScanCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &dyn CheckpointStore {
        self.store.as_ref()
    }

    pub fn load(&self, session_id: &SessionId) -> Result<Option<WorkflowState>, WorkflowError> {
        Ok(self.store.get(session_id)?)
    }

    /// Accepts one inbound input for `session_id` and runs until the graph
    /// terminates or suspends. Fails with `SessionBusy` while another run
    /// owns the session.
    pub fn run(
        &self,
        session_id: &SessionId,
        input: RequestInput,
        now: i64,
    ) -> Result<RunOutcome, WorkflowError> {
        let _guard = self.locks.acquire(session_id)?;
        let mut state = match self.store.get(session_id)? {
            Some(mut state) => {
                if let Some(abandoned) = state.route_decision {
                    tracing::warn!(
                        session_id = %session_id,
                        node = %abandoned,
                        "new input supersedes an interrupted run"
                    );
                }
                state.request_input = input;
                state
            }
            None => WorkflowState::new(session_id.clone(), input, now),
        };
        let entry = route_entry(&state);
        tracing::info!(
            session_id = %session_id,
            entry = %entry,
            awaiting = state.awaiting_acknowledgment,
            "accepted input"
        );
        state.route_decision = Some(entry);
        state.updated_at = now;
        self.store.put(session_id, &state)?;
        self.run_until_idle(state, now)
    }

    /// Resolves `report_id` to its session and delivers the cloning directive.
    pub fn acknowledge(&self, report_id: &ReportId, now: i64) -> Result<RunOutcome, WorkflowError> {
        let session_id = self.store.session_for_report(report_id)?.ok_or_else(|| {
            WorkflowError::UnknownReport {
                report_id: report_id.to_string(),
            }
        })?;
        tracing::info!(session_id = %session_id, report_id = %report_id, "acknowledgment received");
        self.run(
            &session_id,
            RequestInput::initiate_cloning(report_id.clone()),
            now,
        )
    }

    /// Continues a run that stopped between ticks, starting from the node
    /// recorded in its last checkpoint.
    pub fn resume_interrupted(
        &self,
        session_id: &SessionId,
        now: i64,
    ) -> Result<RunOutcome, WorkflowError> {
        let _guard = self.locks.acquire(session_id)?;
        let state = self
            .store
            .get(session_id)?
            .ok_or_else(|| WorkflowError::UnknownSession {
                session_id: session_id.to_string(),
            })?;
        match state.route_decision {
            Some(node) => {
                tracing::info!(session_id = %session_id, node = %node, "resuming interrupted run");
                self.run_until_idle(state, now)
            }
            None => Ok(RunOutcome::from_state(state)),
        }
    }

    fn run_until_idle(&self, mut state: WorkflowState, now: i64) -> Result<RunOutcome, WorkflowError> {
        let mut ticks = 0u32;
        while let Some(node) = state.route_decision {
            if ticks >= MAX_TICKS_PER_INPUT {
                return Err(WorkflowError::TickLimitExceeded {
                    session_id: state.session_id.to_string(),
                    max_ticks: MAX_TICKS_PER_INPUT,
                });
            }
            self.tick(&mut state, node, now)?;
            ticks = ticks.saturating_add(1);
        }
        let outcome = RunOutcome::from_state(state);
        tracing::info!(
            session_id = %outcome.state.session_id,
            status = ?outcome.status,
            ticks,
            "run idle"
        );
        Ok(outcome)
    }

    /// Executes one node: run the step, merge its delta, route, then persist.
    /// The checkpoint write is the last thing a tick does.
    fn tick(&self, state: &mut WorkflowState, node: NodeId, now: i64) -> Result<(), WorkflowError> {
        let spec = node_spec(node);
        let session_id = state.session_id.clone();
        let events = StepEvents::new(&session_id, self.observer.as_deref());
        let ctx = StepContext {
            settings: &self.settings,
            collaborators: &self.collaborators,
            credentials: &self.credentials,
            events: &events,
            now,
        };

        tracing::debug!(session_id = %session_id, node = %node, "executing node");
        let mut delta = (spec.executor)(state, &ctx);
        let (progress, errors) = events.into_parts();
        delta.progress_log.extend(progress);
        delta.error_log.extend(errors);
        let suspends = delta.suspends();
        let previous_report = state.report_id.clone();

        for violation in merge_delta(state, delta) {
            tracing::warn!(session_id = %session_id, node = %node, "{violation}");
            let entry = ProgressEntry::system(violation.clone());
            if let Some(observer) = self.observer.as_deref() {
                observer.on_progress(&session_id, &entry);
            }
            state.progress_log.push(entry);
            state.error_log.push(violation);
        }

        let next = if suspends && state.awaiting_acknowledgment {
            Next::End
        } else {
            (spec.router)(state)
        };
        tracing::debug!(session_id = %session_id, node = %node, next = %next, "routed");
        state.route_decision = next.node();
        state.updated_at = now;

        if let Some(report_id) = state.report_id.as_ref() {
            if previous_report.as_ref() != Some(report_id) {
                self.store.bind_report(report_id, &session_id)?;
            }
        }
        self.store.put(&session_id, state)?;
        Ok(())
    }
}
