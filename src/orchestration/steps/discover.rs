use super::StepContext;
use crate::orchestration::merge::StateDelta;
use crate::orchestration::state::{PlanAction, Target, WorkflowState};
use std::collections::BTreeSet;

pub fn execute_discovery(state: &WorkflowState, ctx: &StepContext<'_>) -> StateDelta {
    let no_targets = StateDelta {
        targets: Some(Vec::new()),
        ..StateDelta::default()
    };
    let Some(plan) = state.plan.as_ref() else {
        ctx.events
            .error("Discovery: no plan found in state, cannot proceed.");
        return no_targets;
    };

    if plan.filters.is_empty() {
        ctx.events
            .system("Contacting the inventory to discover all VMs...");
    } else {
        let rendered = plan
            .filters
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        ctx.events.system(format!(
            "Contacting the inventory to discover VMs matching {rendered}..."
        ));
    }

    let machines = match ctx.collaborators.inventory.list_machines(&plan.filters) {
        Ok(machines) => machines,
        Err(err) => {
            ctx.events.error(format!(
                "Discovery: failed to reach the inventory provider: {err}"
            ));
            return no_targets;
        }
    };

    let discovered = machines.len();
    let discovery = &ctx.settings.discovery;
    let mut seen = BTreeSet::new();
    let targets: Vec<Target> = machines
        .into_iter()
        .filter(|machine| discovery.accepts_status(&machine.status))
        .filter(|machine| seen.insert(machine.id.clone()))
        .collect();
    let dropped = discovered - targets.len();

    let status_label = discovery.required_status.as_deref().unwrap_or("any");
    if targets.is_empty() {
        ctx.events.system(format!(
            "Discovery complete. Found {discovered} VMs, but none are in status '{status_label}'."
        ));
    } else {
        ctx.events.system(format!(
            "Discovery complete. Found {} VMs in status '{status_label}' ({dropped} skipped).",
            targets.len()
        ));
    }

    let final_summary = (plan.action == PlanAction::ListVms).then(|| {
        let listing = render_listing(&targets);
        ctx.events.assistant(listing.clone());
        listing
    });

    StateDelta {
        targets: Some(targets),
        final_summary,
        ..StateDelta::default()
    }
}

fn render_listing(targets: &[Target]) -> String {
    if targets.is_empty() {
        return "No matching VMs were found.".to_string();
    }
    let mut lines = vec![format!("Found {} VMs:", targets.len())];
    for target in targets {
        lines.push(format!(
            "- {} ({}) [{}]",
            target.name,
            target.endpoint().unwrap_or("no address"),
            target.status
        ));
    }
    lines.join("\n")
}
