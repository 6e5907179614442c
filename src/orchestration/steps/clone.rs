use super::StepContext;
use crate::collaborators::{CollaboratorError, NetworkHandle};
use crate::orchestration::fan_out::{fan_out, poll_until_ready, UnitResult};
use crate::orchestration::merge::StateDelta;
use crate::orchestration::state::{
    CloneOutcome, CloneStatus, RequestInput, Target, WorkflowState,
};
use std::time::Duration;

pub fn execute_cloning(state: &WorkflowState, ctx: &StepContext<'_>) -> StateDelta {
    if let RequestInput::Directive { report_id, .. } = &state.request_input {
        if state.report_id.as_ref() != Some(report_id) {
            ctx.events.error(format!(
                "Cloning: report {report_id} is not the current report for this session; acknowledgment ignored."
            ));
            return StateDelta::default();
        }
    }

    let targets = state.pending_clone_targets.clone().unwrap_or_default();
    if targets.is_empty() {
        let notice = "No affected VMs are pending forensic cloning.";
        ctx.events.system(notice);
        return StateDelta::with_final_summary(notice);
    }

    ctx.events.system(format!(
        "Acknowledgment received. Creating forensic copies of {} VMs...",
        targets.len()
    ));
    let network_name = ctx.settings.clone.network_name(state.session_id.as_str());
    let network = match ctx.collaborators.cloud.ensure_network(&network_name) {
        Ok(network) => network,
        Err(err) => {
            ctx.events.error(format!(
                "Cloning: could not prepare isolated network {network_name}: {err}"
            ));
            return StateDelta::default();
        }
    };
    if network.reused {
        ctx.events
            .system(format!("Reusing isolated network {}.", network.name));
    } else {
        ctx.events
            .system(format!("Created isolated network {}.", network.name));
    }

    let results = fan_out(targets.clone(), ctx.settings.clone.max_concurrency, |target| {
        clone_target(&target, &network, state, ctx)
    });
    let outcomes: Vec<CloneOutcome> = targets
        .iter()
        .zip(results)
        .map(|(target, result)| match result {
            UnitResult::Completed(outcome) => outcome,
            UnitResult::Panicked(message) => {
                let reason = format!("clone worker panicked: {message}");
                ctx.events
                    .error(format!("clone failed on {}: {reason}", target.name));
                failed_outcome(target, None, reason)
            }
        })
        .collect();

    let cloned = outcomes
        .iter()
        .filter(|outcome| outcome.status == CloneStatus::Cloned)
        .count();
    let failed = outcomes.len() - cloned;
    let mut summary = format!(
        "Forensic cloning finished on network {}. Cloned: {cloned}. Failed: {failed}.",
        network.name
    );
    if failed > 0 {
        summary.push_str(" Resources created before a failure were left in place.");
    }
    ctx.events.assistant(summary.clone());

    StateDelta {
        clone_outcomes: outcomes,
        final_summary: Some(summary),
        ..StateDelta::default()
    }
}

fn clone_target(
    target: &Target,
    network: &NetworkHandle,
    state: &WorkflowState,
    ctx: &StepContext<'_>,
) -> CloneOutcome {
    let cloud = &ctx.collaborators.cloud;
    let config = &ctx.settings.clone;
    let interval = Duration::from_secs(config.poll_interval_seconds);
    let snapshot_name = format!("{}-forensic-{}", target.name, state.session_id);

    ctx.events
        .system(format!("Creating snapshot {snapshot_name}..."));
    let snapshot_id = match cloud.create_snapshot(target, &snapshot_name) {
        Ok(snapshot_id) => snapshot_id,
        Err(err) => return clone_failed(ctx, target, None, err),
    };
    if let Err(err) = poll_until_ready(
        &format!("snapshot {snapshot_name}"),
        Duration::from_secs(config.snapshot_timeout_seconds),
        interval,
        || cloud.snapshot_status(&snapshot_id),
    ) {
        return clone_failed(ctx, target, Some(snapshot_id), err);
    }

    let instance_name = format!("{}-forensic", target.name);
    let instance_id = match cloud.launch_from_snapshot(&snapshot_id, &network.id, &instance_name) {
        Ok(instance_id) => instance_id,
        Err(err) => return clone_failed(ctx, target, Some(snapshot_id), err),
    };
    if let Err(err) = poll_until_ready(
        &format!("instance {instance_name}"),
        Duration::from_secs(config.instance_timeout_seconds),
        interval,
        || cloud.instance_status(&instance_id),
    ) {
        let mut outcome = clone_failed(ctx, target, Some(snapshot_id), err);
        outcome.instance_ref = Some(instance_id);
        return outcome;
    }

    ctx.events.system(format!(
        "Forensic copy of {} is running as {instance_name}.",
        target.name
    ));
    CloneOutcome {
        target_id: target.id.clone(),
        target_name: target.name.clone(),
        status: CloneStatus::Cloned,
        snapshot_ref: Some(snapshot_id),
        instance_ref: Some(instance_id),
        error: None,
    }
}

fn clone_failed(
    ctx: &StepContext<'_>,
    target: &Target,
    snapshot_ref: Option<String>,
    err: CollaboratorError,
) -> CloneOutcome {
    let reason = err.to_string();
    ctx.events
        .error(format!("clone failed on {}: {reason}", target.name));
    failed_outcome(target, snapshot_ref, reason)
}

fn failed_outcome(target: &Target, snapshot_ref: Option<String>, reason: String) -> CloneOutcome {
    CloneOutcome {
        target_id: target.id.clone(),
        target_name: target.name.clone(),
        status: CloneStatus::Failed,
        snapshot_ref,
        instance_ref: None,
        error: Some(reason),
    }
}
