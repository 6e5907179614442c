use super::StepContext;
use crate::orchestration::fan_out::{fan_out, UnitResult};
use crate::orchestration::merge::StateDelta;
use crate::orchestration::state::{ScanOutcome, ScanStatus, Target, WorkflowState};

pub fn execute_scan(state: &WorkflowState, ctx: &StepContext<'_>) -> StateDelta {
    let scan = &ctx.settings.scan;
    let selected: Vec<Target> = state
        .targets
        .iter()
        .filter(|target| scan.selects_name(&target.name))
        .cloned()
        .collect();
    if let Some(prefix) = scan.target_name_prefix.as_deref() {
        ctx.events.system(format!(
            "Selected {} of {} VMs whose name starts with '{prefix}'.",
            selected.len(),
            state.targets.len()
        ));
    }
    if selected.is_empty() {
        ctx.events
            .system("No VMs matched the scan selection; skipping execution.");
        return StateDelta::default();
    }

    let Some(profile) = state
        .plan
        .as_ref()
        .and_then(|plan| plan.scan_profile.as_deref())
    else {
        ctx.events
            .error("Execution: no scan profile specified in the plan.");
        return StateDelta::default();
    };

    ctx.events.system(format!(
        "Beginning security scans on {} VMs. This may take some time...",
        selected.len()
    ));

    let results = fan_out(selected.clone(), scan.max_concurrency, |target| {
        scan_target(&target, profile, ctx)
    });
    let outcomes: Vec<ScanOutcome> = selected
        .iter()
        .zip(results)
        .map(|(target, result)| match result {
            UnitResult::Completed(outcome) => outcome,
            UnitResult::Panicked(message) => {
                let outcome = ScanOutcome::failed(target, format!("scan worker panicked: {message}"));
                report_failure(ctx, &outcome);
                outcome
            }
        })
        .collect();

    let successful = outcomes.iter().filter(|outcome| outcome.has_report()).count();
    ctx.events.system(format!(
        "All scans complete. Successful reports: {successful}. Failures: {}.",
        outcomes.len() - successful
    ));

    StateDelta {
        scan_outcomes: outcomes,
        ..StateDelta::default()
    }
}

fn scan_target(target: &Target, profile: &str, ctx: &StepContext<'_>) -> ScanOutcome {
    let Some(address) = target.endpoint() else {
        let outcome = ScanOutcome::skipped(target, "no addressable endpoint");
        report_failure(ctx, &outcome);
        return outcome;
    };

    ctx.events
        .system(format!("Starting scan on {} ({address})...", target.name));
    let outcome = match ctx
        .collaborators
        .scanner
        .scan(profile, address, ctx.credentials)
    {
        Ok(report) => match (report.status, report.artifact_ref) {
            (ScanStatus::Successful, Some(artifact_ref)) => {
                ScanOutcome::successful(target, artifact_ref)
            }
            (ScanStatus::Successful, None) => {
                ScanOutcome::failed(target, "scan reported success without a report artifact")
            }
            (ScanStatus::Skipped, _) => ScanOutcome::skipped(
                target,
                report.error.unwrap_or_else(|| "skipped by scanner".to_string()),
            ),
            (ScanStatus::Failed, _) => ScanOutcome::failed(
                target,
                report.error.unwrap_or_else(|| "Unknown error".to_string()),
            ),
        },
        Err(err) => ScanOutcome::failed(target, err.to_string()),
    };

    if outcome.has_report() {
        ctx.events.system(format!(
            "Scan completed for {}. Status: {}.",
            target.name, outcome.status
        ));
    } else {
        report_failure(ctx, &outcome);
    }
    outcome
}

fn report_failure(ctx: &StepContext<'_>, outcome: &ScanOutcome) {
    ctx.events.error(format!(
        "scan failed on {}: {}",
        outcome.target_name,
        outcome.failure_reason()
    ));
}
