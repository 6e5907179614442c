use crate::orchestration::node::NodeId;
use crate::shared::{ReportId, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveAction {
    InitiateCloning,
    #[serde(other)]
    Unknown,
}

/// What arrived at the engine for this tick: free text from a user, or a
/// structured directive raised by an out-of-band webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestInput {
    Text {
        text: String,
    },
    Directive {
        action: DirectiveAction,
        #[serde(rename = "reportId")]
        report_id: ReportId,
    },
}

impl RequestInput {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text { text: value.into() }
    }

    pub fn initiate_cloning(report_id: ReportId) -> Self {
        Self::Directive {
            action: DirectiveAction::InitiateCloning,
            report_id,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            Self::Directive { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    ListVms,
    SecurityScan,
    #[serde(other)]
    Invalid,
}

impl PlanAction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "list_vms" => Self::ListVms,
            "security_scan" => Self::SecurityScan,
            _ => Self::Invalid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListVms => "list_vms",
            Self::SecurityScan => "security_scan",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub action: PlanAction,
    #[serde(default)]
    pub scan_profile: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub status: String,
}

impl Target {
    pub fn endpoint(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Successful,
    Failed,
    Skipped,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub target_id: String,
    pub target_name: String,
    pub status: ScanStatus,
    #[serde(default)]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScanOutcome {
    pub fn successful(target: &Target, artifact_ref: impl Into<String>) -> Self {
        Self {
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            status: ScanStatus::Successful,
            artifact_ref: Some(artifact_ref.into()),
            error: None,
        }
    }

    pub fn failed(target: &Target, reason: impl Into<String>) -> Self {
        Self {
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            status: ScanStatus::Failed,
            artifact_ref: None,
            error: Some(reason.into()),
        }
    }

    pub fn skipped(target: &Target, reason: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Skipped,
            ..Self::failed(target, reason)
        }
    }

    /// Successful and carrying a report artifact; anything else is a failure at fan-in.
    pub fn has_report(&self) -> bool {
        self.status == ScanStatus::Successful && self.artifact_ref.is_some()
    }

    pub fn failure_reason(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub classification: String,
    #[serde(default)]
    pub references: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub actor: Actor,
    pub text: String,
}

impl ProgressEntry {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            actor: Actor::System,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            actor: Actor::Assistant,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftNotification {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStatus {
    Cloned,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneOutcome {
    pub target_id: String,
    pub target_name: String,
    pub status: CloneStatus,
    #[serde(default)]
    pub snapshot_ref: Option<String>,
    #[serde(default)]
    pub instance_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The durable record threaded through every step and persisted after every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub session_id: SessionId,
    pub request_input: RequestInput,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub scan_outcomes: Vec<ScanOutcome>,
    #[serde(default)]
    pub findings: BTreeMap<String, Vec<Finding>>,
    #[serde(default)]
    pub error_log: Vec<String>,
    #[serde(default)]
    pub progress_log: Vec<ProgressEntry>,
    #[serde(default)]
    pub awaiting_acknowledgment: bool,
    #[serde(default)]
    pub draft_notification: Option<DraftNotification>,
    #[serde(default)]
    pub pending_clone_targets: Option<Vec<Target>>,
    /// Next node to execute. `Some` between ticks of a live run; left set by a
    /// crash so the run can be picked up where it stopped.
    #[serde(default)]
    pub route_decision: Option<NodeId>,
    #[serde(default)]
    pub final_summary: Option<String>,
    #[serde(default)]
    pub email_sent: bool,
    #[serde(default)]
    pub report_id: Option<ReportId>,
    #[serde(default)]
    pub clone_outcomes: Vec<CloneOutcome>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WorkflowState {
    pub fn new(session_id: SessionId, request_input: RequestInput, now: i64) -> Self {
        Self {
            session_id,
            request_input,
            plan: None,
            targets: Vec::new(),
            scan_outcomes: Vec::new(),
            findings: BTreeMap::new(),
            error_log: Vec::new(),
            progress_log: Vec::new(),
            awaiting_acknowledgment: false,
            draft_notification: None,
            pending_clone_targets: None,
            route_decision: None,
            final_summary: None,
            email_sent: false,
            report_id: None,
            clone_outcomes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn plan_action(&self) -> Option<PlanAction> {
        self.plan.as_ref().map(|plan| plan.action)
    }

    pub fn has_target(&self, target_id: &str) -> bool {
        self.targets.iter().any(|target| target.id == target_id)
    }
}
