//! Seams between the workflow steps and the outside world. Every external
//! system is a trait here; concrete clients live in the submodules.

pub mod artifacts;
pub mod inventory;
pub mod llm;
pub mod mail;
pub mod openstack;
pub mod prompts;
pub mod report;
pub mod scan_command;

use crate::config::{ConfigError, Settings};
use crate::orchestration::state::{Finding, ScanStatus, Target};
use crate::shared::SessionId;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub use artifacts::CsvArtifactWriter;
pub use inventory::{HttpInventory, UnconfiguredInventory};
pub use llm::{LlmClient, UnconfiguredLlm};
pub use mail::{HttpMailRelay, UnconfiguredTransport};
pub use openstack::{OpenStackCloud, UnconfiguredCloud};
pub use report::JsonReportParser;
pub use scan_command::CommandScanExecutor;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} is not configured: {reason}")]
    NotConfigured { service: String, reason: String },
    #[error("connection to {service} failed: {reason}")]
    Connectivity { service: String, reason: String },
    #[error("{service} returned an empty response")]
    EmptyResponse { service: String },
    #[error("{service} returned an invalid response: {reason}")]
    InvalidResponse { service: String, reason: String },
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: String, timeout_secs: u64 },
    #[error("{service} failed: {reason}")]
    Failed { service: String, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CollaboratorError {
    pub fn failed(service: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(service: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_ureq(service: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                Self::Failed {
                    service: service.to_string(),
                    reason: format!("http {code}: {}", body.trim()),
                }
            }
            ureq::Error::Transport(transport) => Self::Connectivity {
                service: service.to_string(),
                reason: transport.to_string(),
            },
        }
    }
}

/// Credentials handed to every scan unit.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ScanCredentials {
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for ScanCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCredentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub status: ScanStatus,
    pub artifact_ref: Option<String>,
    pub error: Option<String>,
}

impl ScanReport {
    pub fn completed(artifact_ref: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Successful,
            artifact_ref: Some(artifact_ref.into()),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Failed,
            artifact_ref: None,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTemplate {
    /// Must yield a JSON object with `overall_summary` and `vulnerability_details`.
    StructuredSummary,
    /// Must embed the acknowledgment link verbatim.
    NotificationBody,
    UiSummary,
    Subject,
}

impl SummaryTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StructuredSummary => "structured-summary",
            Self::NotificationBody => "notification-body",
            Self::UiSummary => "ui-summary",
            Self::Subject => "subject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundNotification {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachment_ref: Option<String>,
}

/// One row of the findings table artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FindingRow {
    #[serde(rename = "VM Name")]
    pub target_name: String,
    #[serde(rename = "Vulnerability ID")]
    pub finding_id: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "Classification")]
    pub classification: String,
    #[serde(rename = "References")]
    pub references: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    Pending,
    Ready,
    Failed(String),
}

pub trait Planner: Send + Sync {
    /// Returns the raw plan text for `request`; validation happens in the plan step.
    fn plan(&self, request: &str) -> Result<String, CollaboratorError>;
}

pub trait Inventory: Send + Sync {
    fn list_machines(
        &self,
        filters: &BTreeMap<String, String>,
    ) -> Result<Vec<Target>, CollaboratorError>;
}

pub trait ScanExecutor: Send + Sync {
    fn scan(
        &self,
        profile: &str,
        address: &str,
        credentials: &ScanCredentials,
    ) -> Result<ScanReport, CollaboratorError>;
}

pub trait ReportParser: Send + Sync {
    fn parse(&self, artifact_ref: &str) -> Result<Vec<Finding>, CollaboratorError>;
}

pub trait Summarizer: Send + Sync {
    fn render(&self, template: SummaryTemplate, payload: &Value)
        -> Result<String, CollaboratorError>;
}

pub trait NotificationTransport: Send + Sync {
    fn send(&self, notification: &OutboundNotification) -> Result<(), CollaboratorError>;
}

pub trait ArtifactWriter: Send + Sync {
    /// Persists the findings table and returns a reference usable as an attachment.
    fn write_findings_table(
        &self,
        session_id: &SessionId,
        rows: &[FindingRow],
    ) -> Result<String, CollaboratorError>;
}

pub trait CloudResources: Send + Sync {
    /// Returns the existing network named `name`, or creates it.
    fn ensure_network(&self, name: &str) -> Result<NetworkHandle, CollaboratorError>;

    fn create_snapshot(
        &self,
        target: &Target,
        snapshot_name: &str,
    ) -> Result<String, CollaboratorError>;

    fn snapshot_status(&self, snapshot_id: &str) -> Result<ResourceStatus, CollaboratorError>;

    fn launch_from_snapshot(
        &self,
        snapshot_id: &str,
        network_id: &str,
        instance_name: &str,
    ) -> Result<String, CollaboratorError>;

    fn instance_status(&self, instance_id: &str) -> Result<ResourceStatus, CollaboratorError>;
}

pub struct Collaborators {
    pub planner: Box<dyn Planner>,
    pub inventory: Box<dyn Inventory>,
    pub scanner: Box<dyn ScanExecutor>,
    pub report_parser: Box<dyn ReportParser>,
    pub summarizer: Box<dyn Summarizer>,
    pub transport: Box<dyn NotificationTransport>,
    pub artifacts: Box<dyn ArtifactWriter>,
    pub cloud: Box<dyn CloudResources>,
}

impl Collaborators {
    /// Builds the production clients from settings. Sections that are absent
    /// yield stand-ins that fail when used, so unrelated commands still run.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let (planner, summarizer): (Box<dyn Planner>, Box<dyn Summarizer>) =
            match LlmClient::from_config(&settings.llm) {
                Ok(client) => (Box::new(client.clone()), Box::new(client)),
                Err(ConfigError::MissingEnv { name }) => {
                    tracing::warn!(env = %name, "llm api key not set; planning and summaries are disabled");
                    let stand_in = UnconfiguredLlm::new(format!("environment variable `{name}` is not set"));
                    (Box::new(stand_in.clone()), Box::new(stand_in))
                }
                Err(err) => return Err(err),
            };
        let inventory: Box<dyn Inventory> = match settings.inventory.as_ref() {
            Some(config) => Box::new(HttpInventory::from_config(config)?),
            None => Box::new(UnconfiguredInventory),
        };
        let transport: Box<dyn NotificationTransport> =
            match HttpMailRelay::from_config(&settings.notification) {
                Some(relay) => Box::new(relay),
                None => Box::new(UnconfiguredTransport),
            };
        let cloud: Box<dyn CloudResources> = match settings.cloud.as_ref() {
            Some(config) => Box::new(OpenStackCloud::from_config(config)?),
            None => Box::new(UnconfiguredCloud),
        };
        Ok(Self {
            planner,
            inventory,
            scanner: Box::new(CommandScanExecutor::from_config(&settings.scan)),
            report_parser: Box::new(JsonReportParser),
            summarizer,
            transport,
            artifacts: Box::new(CsvArtifactWriter::new(settings.reports_dir())),
            cloud,
        })
    }
}
