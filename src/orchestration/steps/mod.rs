mod analyze;
mod clone;
mod discover;
mod notify;
mod plan;
mod scan;

pub use analyze::{
    execute_analysis, latest_reports, StructuredSummary, APPROVAL_INSTRUCTION,
    NO_FINDINGS_SUMMARY, NO_REPORTS_SUMMARY,
};
pub use clone::execute_cloning;
pub use discover::execute_discovery;
pub use notify::execute_notification;
pub use plan::{execute_plan, parse_plan};
pub use scan::execute_scan;

use crate::collaborators::{Collaborators, ScanCredentials};
use crate::config::Settings;
use crate::orchestration::events::StepEvents;

/// Everything a step may read besides the workflow state. Steps never write
/// state directly; they return a delta and report through `events`.
pub struct StepContext<'a> {
    pub settings: &'a Settings,
    pub collaborators: &'a Collaborators,
    pub credentials: &'a ScanCredentials,
    pub events: &'a StepEvents<'a>,
    pub now: i64,
}
