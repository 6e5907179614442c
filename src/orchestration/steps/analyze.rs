use super::StepContext;
use crate::collaborators::{CollaboratorError, FindingRow, SummaryTemplate};
use crate::orchestration::merge::StateDelta;
use crate::orchestration::state::{
    DraftNotification, Finding, ScanOutcome, Target, WorkflowState,
};
use crate::shared::ReportId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const NO_REPORTS_SUMMARY: &str = "No scan reports were generated. Skipping analysis.";
pub const NO_FINDINGS_SUMMARY: &str =
    "Analysis complete. No critical vulnerabilities found in any of the reports.";
pub const APPROVAL_INSTRUCTION: &str = "I have prepared a detailed report and a draft email. To send this report to the SOC team, please reply with 'send email'.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredSummary {
    pub overall_summary: String,
    #[serde(default)]
    pub vulnerability_details: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
enum DraftError {
    #[error("{stage} call failed: {source}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: CollaboratorError,
    },
    #[error("{stage} returned an empty result")]
    Empty { stage: &'static str },
    #[error("structured summary is invalid: {0}")]
    InvalidSummary(String),
}

struct Drafts {
    notification: DraftNotification,
    ui_summary: String,
}

/// Latest report-bearing outcome per current target, in target order.
pub fn latest_reports<'s>(state: &'s WorkflowState) -> Vec<(&'s Target, &'s ScanOutcome)> {
    state
        .targets
        .iter()
        .filter_map(|target| {
            state
                .scan_outcomes
                .iter()
                .rev()
                .find(|outcome| outcome.target_id == target.id)
                .filter(|outcome| outcome.has_report())
                .map(|outcome| (target, outcome))
        })
        .collect()
}

pub fn execute_analysis(state: &WorkflowState, ctx: &StepContext<'_>) -> StateDelta {
    let reports = latest_reports(state);
    if reports.is_empty() {
        ctx.events.system(NO_REPORTS_SUMMARY);
        return StateDelta::with_final_summary(NO_REPORTS_SUMMARY);
    }
    ctx.events
        .system(format!("Analyzing {} scan reports...", reports.len()));

    let mut findings: BTreeMap<String, Vec<Finding>> = BTreeMap::new();
    let mut affected: Vec<Target> = Vec::new();
    for (target, outcome) in &reports {
        let Some(artifact_ref) = outcome.artifact_ref.as_deref() else {
            continue;
        };
        match ctx.collaborators.report_parser.parse(artifact_ref) {
            Ok(parsed) if parsed.is_empty() => {}
            Ok(parsed) => {
                findings.insert(outcome.target_name.clone(), parsed);
                affected.push((*target).clone());
            }
            Err(err) => ctx.events.error(format!(
                "Analysis: could not read the report for {}: {err}",
                outcome.target_name
            )),
        }
    }

    if findings.is_empty() {
        ctx.events.system(NO_FINDINGS_SUMMARY);
        return StateDelta {
            findings: Some(findings),
            final_summary: Some(NO_FINDINGS_SUMMARY.to_string()),
            ..StateDelta::default()
        };
    }

    let total: usize = findings.values().map(Vec::len).sum();
    ctx.events.system(format!(
        "Found {total} vulnerabilities across {} VMs.",
        findings.len()
    ));

    let attachment_ref = write_findings_table(ctx, state, &findings);

    let report_id = match ReportId::generate(ctx.now) {
        Ok(report_id) => report_id,
        Err(err) => {
            ctx.events
                .error(format!("Analysis: could not allocate a report id: {err}"));
            return StateDelta {
                findings: Some(findings),
                ..StateDelta::default()
            };
        }
    };
    let link = ctx.settings.acknowledgment.link_for(report_id.as_str());

    ctx.events
        .system("Generating summary and drafting notification...");
    match draft_notification(ctx, &findings, &link, attachment_ref) {
        Ok(drafts) => {
            ctx.events.assistant(drafts.ui_summary.clone());
            ctx.events.assistant(APPROVAL_INSTRUCTION);
            StateDelta {
                findings: Some(findings),
                awaiting_acknowledgment: Some(true),
                draft_notification: Some(drafts.notification),
                pending_clone_targets: Some(affected),
                report_id: Some(report_id),
                email_sent: Some(false),
                final_summary: Some(format!("{}\n\n{APPROVAL_INSTRUCTION}", drafts.ui_summary)),
                ..StateDelta::default()
            }
        }
        Err(err) => {
            ctx.events
                .error(format!("Analysis: notification drafting failed: {err}"));
            StateDelta {
                findings: Some(findings),
                ..StateDelta::default()
            }
        }
    }
}

fn write_findings_table(
    ctx: &StepContext<'_>,
    state: &WorkflowState,
    findings: &BTreeMap<String, Vec<Finding>>,
) -> Option<String> {
    let rows: Vec<FindingRow> = findings
        .iter()
        .flat_map(|(target_name, entries)| {
            entries.iter().map(move |finding| FindingRow {
                target_name: target_name.clone(),
                finding_id: finding.id.clone(),
                title: finding.title.clone(),
                classification: finding.classification.clone(),
                references: finding.references.clone(),
            })
        })
        .collect();
    match ctx
        .collaborators
        .artifacts
        .write_findings_table(&state.session_id, &rows)
    {
        Ok(artifact_ref) => {
            ctx.events
                .system(format!("Vulnerability summary saved to: {artifact_ref}"));
            Some(artifact_ref)
        }
        Err(err) => {
            ctx.events.warn(format!(
                "Could not write the findings table, the notification will have no attachment: {err}"
            ));
            None
        }
    }
}

fn draft_notification(
    ctx: &StepContext<'_>,
    findings: &BTreeMap<String, Vec<Finding>>,
    link: &str,
    attachment_ref: Option<String>,
) -> Result<Drafts, DraftError> {
    let details: BTreeMap<&str, Vec<&str>> = findings
        .iter()
        .map(|(name, entries)| {
            (
                name.as_str(),
                entries.iter().map(|finding| finding.title.as_str()).collect(),
            )
        })
        .collect();

    let structured_raw = render(
        ctx,
        SummaryTemplate::StructuredSummary,
        &json!({ "vulnerability_details": details }),
    )?;
    let structured = parse_structured_summary(&structured_raw)?;
    let summary = serde_json::to_value(&structured)
        .map_err(|err| DraftError::InvalidSummary(err.to_string()))?;

    let mut body = render(
        ctx,
        SummaryTemplate::NotificationBody,
        &json!({
            "summary": summary,
            "acknowledgment_link": link,
            "attachment": attachment_ref,
        }),
    )?;
    if !body.contains(link) {
        tracing::warn!("notification body omitted the acknowledgment link; appending it");
        body.push_str(&format!(
            "\n\nTo acknowledge this report and start forensic cloning, open: {link}"
        ));
    }

    let ui_summary = render(ctx, SummaryTemplate::UiSummary, &json!({ "summary": summary }))?;
    let subject = render(
        ctx,
        SummaryTemplate::Subject,
        &json!({ "overall_summary": structured.overall_summary }),
    )?;

    Ok(Drafts {
        notification: DraftNotification {
            subject: subject.lines().next().unwrap_or_default().trim().to_string(),
            body,
            attachment_ref,
        },
        ui_summary,
    })
}

fn render(
    ctx: &StepContext<'_>,
    template: SummaryTemplate,
    payload: &Value,
) -> Result<String, DraftError> {
    let stage = template.as_str();
    let text = ctx
        .collaborators
        .summarizer
        .render(template, payload)
        .map_err(|source| DraftError::Collaborator { stage, source })?;
    let text = text.trim();
    if text.is_empty() {
        return Err(DraftError::Empty { stage });
    }
    Ok(text.to_string())
}

fn parse_structured_summary(raw: &str) -> Result<StructuredSummary, DraftError> {
    let summary: StructuredSummary =
        serde_json::from_str(raw).map_err(|err| DraftError::InvalidSummary(err.to_string()))?;
    if summary.overall_summary.trim().is_empty() {
        return Err(DraftError::InvalidSummary(
            "`overall_summary` is empty".to_string(),
        ));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::state::RequestInput;
    use crate::shared::SessionId;

    fn target(id: &str) -> Target {
        Target {
            id: id.to_string(),
            name: format!("vm-{id}"),
            address: Some("10.0.0.1".to_string()),
            status: "ACTIVE".to_string(),
        }
    }

    #[test]
    fn latest_outcome_per_target_wins() {
        let mut state = WorkflowState::new(
            SessionId::parse("analysis").expect("session"),
            RequestInput::text("scan"),
            0,
        );
        let a = target("a");
        let b = target("b");
        state.targets = vec![a.clone(), b.clone()];
        state.scan_outcomes = vec![
            ScanOutcome::successful(&a, "/old/a.json"),
            ScanOutcome::successful(&b, "/old/b.json"),
            ScanOutcome::failed(&b, "timeout"),
            ScanOutcome::successful(&a, "/new/a.json"),
        ];
        let reports = latest_reports(&state);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.artifact_ref.as_deref(), Some("/new/a.json"));
    }

    #[test]
    fn structured_summary_requires_overall_text() {
        assert!(parse_structured_summary(r#"{"vulnerability_details":{}}"#).is_err());
        assert!(parse_structured_summary(r#"{"overall_summary":"  "}"#).is_err());
        let parsed = parse_structured_summary(
            r#"{"overall_summary":"two hosts","vulnerability_details":{"vm-a":["CVE-1"]}}"#,
        )
        .expect("summary");
        assert_eq!(parsed.vulnerability_details["vm-a"], vec!["CVE-1"]);
    }
}
