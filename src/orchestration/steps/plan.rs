use super::StepContext;
use crate::collaborators::CollaboratorError;
use crate::orchestration::merge::StateDelta;
use crate::orchestration::state::{Plan, PlanAction, WorkflowState};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const PLAN_FIELDS: [&str; 3] = ["action", "scanProfile", "filters"];

pub fn execute_plan(state: &WorkflowState, ctx: &StepContext<'_>) -> StateDelta {
    ctx.events.system("Parsing user query to create a plan...");

    let Some(request) = state.request_input.as_text() else {
        return plan_failed(ctx, "Supervisor: the request carries no text to plan from.");
    };

    let raw = match ctx.collaborators.planner.plan(request) {
        Ok(raw) => raw,
        Err(CollaboratorError::EmptyResponse { .. }) => String::new(),
        Err(err) => {
            return plan_failed(ctx, format!("Supervisor: planner call failed: {err}"));
        }
    };
    if raw.trim().is_empty() {
        return plan_failed(ctx, "Supervisor: planner returned an empty plan.");
    }

    let plan = match parse_plan(&raw) {
        Ok(plan) => plan,
        Err(reason) => {
            return plan_failed(
                ctx,
                format!(
                    "Supervisor: planner returned a malformed plan: {reason}. Please try rephrasing your query."
                ),
            );
        }
    };

    ctx.events.system(format!(
        "Plan created successfully. Action: '{}'.",
        plan.action
    ));
    let final_summary = (plan.action == PlanAction::Invalid).then(|| {
        let notice = "The request does not map to a supported action, so there is nothing to do.";
        ctx.events.assistant(notice);
        notice.to_string()
    });

    StateDelta {
        plan: Some(Some(plan)),
        final_summary,
        ..StateDelta::default()
    }
}

/// Clears the plan and makes the failure the turn's summary.
fn plan_failed(ctx: &StepContext<'_>, text: impl Into<String>) -> StateDelta {
    let text = text.into();
    ctx.events.error(text.clone());
    StateDelta {
        plan: Some(None),
        final_summary: Some(text),
        ..StateDelta::default()
    }
}

/// Validates planner output: a JSON object holding exactly `action`,
/// `scanProfile` and `filters`. `playbook` and `scan_profile` are accepted
/// as aliases of `scanProfile`.
pub fn parse_plan(raw: &str) -> Result<Plan, String> {
    let value: Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(|err| format!("not json: {err}"))?;
    let Value::Object(fields) = value else {
        return Err("plan must be a json object".to_string());
    };

    let mut normalized = Map::new();
    for (key, value) in fields {
        let key = match key.as_str() {
            "playbook" | "scan_profile" => "scanProfile".to_string(),
            _ => key,
        };
        if !PLAN_FIELDS.contains(&key.as_str()) {
            return Err(format!("unexpected field `{key}`"));
        }
        if normalized.insert(key.clone(), value).is_some() {
            return Err(format!("field `{key}` given more than once"));
        }
    }
    for field in PLAN_FIELDS {
        if !normalized.contains_key(field) {
            return Err(format!("missing field `{field}`"));
        }
    }

    let action = match &normalized["action"] {
        Value::String(action) => PlanAction::parse(action),
        Value::Null => PlanAction::Invalid,
        other => return Err(format!("`action` must be a string, got {other}")),
    };
    let scan_profile = match &normalized["scanProfile"] {
        Value::String(profile) if profile.trim().is_empty() => None,
        Value::String(profile) => Some(profile.trim().to_string()),
        Value::Null => None,
        other => return Err(format!("`scanProfile` must be a string or null, got {other}")),
    };
    let filters = parse_filters(&normalized["filters"])?;

    Ok(Plan {
        action,
        scan_profile,
        filters,
    })
}

fn parse_filters(value: &Value) -> Result<BTreeMap<String, String>, String> {
    let entries = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(entries) => entries,
        other => return Err(format!("`filters` must be an object, got {other}")),
    };
    let mut filters = BTreeMap::new();
    for (key, value) in entries {
        let rendered = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => continue,
            Value::Array(_) | Value::Object(_) => {
                return Err(format!("filter `{key}` must be a scalar value"))
            }
        };
        filters.insert(key.clone(), rendered);
    }
    Ok(filters)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
