use crate::orchestration::state::{
    CloneOutcome, DraftNotification, Finding, Plan, ProgressEntry, ScanOutcome, Target,
    WorkflowState,
};
use crate::shared::ReportId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    Replace,
    Append,
}

/// Every state field a step may touch. Fields absent here (session id, input,
/// route decision, timestamps) belong to the engine alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    Plan,
    Targets,
    ScanOutcomes,
    Findings,
    ErrorLog,
    ProgressLog,
    AwaitingAcknowledgment,
    DraftNotification,
    PendingCloneTargets,
    FinalSummary,
    EmailSent,
    ReportId,
    CloneOutcomes,
}

impl StateField {
    pub const ALL: [StateField; 13] = [
        StateField::Plan,
        StateField::Targets,
        StateField::ScanOutcomes,
        StateField::Findings,
        StateField::ErrorLog,
        StateField::ProgressLog,
        StateField::AwaitingAcknowledgment,
        StateField::DraftNotification,
        StateField::PendingCloneTargets,
        StateField::FinalSummary,
        StateField::EmailSent,
        StateField::ReportId,
        StateField::CloneOutcomes,
    ];

    pub fn policy(self) -> MergePolicy {
        match self {
            Self::ScanOutcomes | Self::ErrorLog | Self::ProgressLog | Self::CloneOutcomes => {
                MergePolicy::Append
            }
            Self::Plan
            | Self::Targets
            | Self::Findings
            | Self::AwaitingAcknowledgment
            | Self::DraftNotification
            | Self::PendingCloneTargets
            | Self::FinalSummary
            | Self::EmailSent
            | Self::ReportId => MergePolicy::Replace,
        }
    }
}

/// Partial update returned by a step. `None` on a replace field means "leave
/// untouched"; append fields are extended with whatever they hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    /// `Some(None)` clears the plan.
    pub plan: Option<Option<Plan>>,
    pub targets: Option<Vec<Target>>,
    pub scan_outcomes: Vec<ScanOutcome>,
    pub findings: Option<BTreeMap<String, Vec<Finding>>>,
    pub error_log: Vec<String>,
    pub progress_log: Vec<ProgressEntry>,
    pub awaiting_acknowledgment: Option<bool>,
    pub draft_notification: Option<DraftNotification>,
    pub pending_clone_targets: Option<Vec<Target>>,
    pub final_summary: Option<String>,
    pub email_sent: Option<bool>,
    pub report_id: Option<ReportId>,
    pub clone_outcomes: Vec<CloneOutcome>,
}

impl StateDelta {
    pub fn with_final_summary(summary: impl Into<String>) -> Self {
        Self {
            final_summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub fn suspends(&self) -> bool {
        self.awaiting_acknowledgment == Some(true)
    }
}

fn replace<T>(field: StateField, slot: &mut T, value: Option<T>) {
    debug_assert_eq!(field.policy(), MergePolicy::Replace);
    if let Some(value) = value {
        *slot = value;
    }
}

fn append<T>(field: StateField, slot: &mut Vec<T>, values: Vec<T>) {
    debug_assert_eq!(field.policy(), MergePolicy::Append);
    slot.extend(values);
}

/// Applies `delta` to `state` field by field. Returns the entries that were
/// rejected for breaking a state invariant; the caller records them.
pub fn merge_delta(state: &mut WorkflowState, delta: StateDelta) -> Vec<String> {
    let StateDelta {
        plan,
        targets,
        scan_outcomes,
        findings,
        error_log,
        progress_log,
        awaiting_acknowledgment,
        draft_notification,
        pending_clone_targets,
        final_summary,
        email_sent,
        report_id,
        clone_outcomes,
    } = delta;
    let mut violations = Vec::new();

    replace(StateField::Plan, &mut state.plan, plan);
    replace(
        StateField::Targets,
        &mut state.targets,
        targets.map(|targets| dedup_targets(targets, &mut violations)),
    );

    let scan_outcomes = scan_outcomes
        .into_iter()
        .filter(|outcome| {
            let known = state.has_target(&outcome.target_id);
            if !known {
                violations.push(format!(
                    "rejected scan outcome for unknown target `{}`",
                    outcome.target_id
                ));
            }
            known
        })
        .collect();
    append(StateField::ScanOutcomes, &mut state.scan_outcomes, scan_outcomes);

    let findings = findings.map(|mut findings| {
        let reported: BTreeSet<&str> = state
            .scan_outcomes
            .iter()
            .filter(|outcome| outcome.has_report())
            .map(|outcome| outcome.target_name.as_str())
            .collect();
        findings.retain(|name, _| {
            let known = reported.contains(name.as_str());
            if !known {
                violations.push(format!(
                    "rejected findings for `{name}`: no successful scan report"
                ));
            }
            known
        });
        findings
    });
    replace(StateField::Findings, &mut state.findings, findings);

    append(StateField::ErrorLog, &mut state.error_log, error_log);
    append(StateField::ProgressLog, &mut state.progress_log, progress_log);
    replace(
        StateField::DraftNotification,
        &mut state.draft_notification,
        draft_notification.map(Some),
    );
    replace(
        StateField::AwaitingAcknowledgment,
        &mut state.awaiting_acknowledgment,
        awaiting_acknowledgment,
    );
    if state.awaiting_acknowledgment && state.draft_notification.is_none() {
        state.awaiting_acknowledgment = false;
        violations.push("rejected acknowledgment wait without a drafted notification".to_string());
    }
    replace(
        StateField::PendingCloneTargets,
        &mut state.pending_clone_targets,
        pending_clone_targets.map(Some),
    );
    replace(
        StateField::FinalSummary,
        &mut state.final_summary,
        final_summary.map(Some),
    );
    replace(StateField::EmailSent, &mut state.email_sent, email_sent);
    replace(StateField::ReportId, &mut state.report_id, report_id.map(Some));
    append(
        StateField::CloneOutcomes,
        &mut state.clone_outcomes,
        clone_outcomes,
    );

    violations
}

fn dedup_targets(targets: Vec<Target>, violations: &mut Vec<String>) -> Vec<Target> {
    let mut seen = BTreeSet::new();
    targets
        .into_iter()
        .filter(|target| {
            let fresh = seen.insert(target.id.clone());
            if !fresh {
                violations.push(format!("dropped duplicate target id `{}`", target.id));
            }
            fresh
        })
        .collect()
}
