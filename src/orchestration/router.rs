use crate::orchestration::node::{Next, NodeId};
use crate::orchestration::state::{DirectiveAction, PlanAction, RequestInput, WorkflowState};

/// Free-text approval that releases a drafted notification.
pub const APPROVAL_PHRASE: &str = "send email";

pub fn is_approval(text: &str) -> bool {
    text.to_lowercase().contains(APPROVAL_PHRASE)
}

/// Entry routing, evaluated once per inbound input. First match wins, and a
/// parked session treats anything but an approval as a new request.
pub fn route_entry(state: &WorkflowState) -> NodeId {
    if state.awaiting_acknowledgment {
        return match &state.request_input {
            RequestInput::Text { text } if is_approval(text) => NodeId::SendNotification,
            _ => NodeId::Plan,
        };
    }
    match &state.request_input {
        RequestInput::Directive {
            action: DirectiveAction::InitiateCloning,
            ..
        } => NodeId::StartCloning,
        _ => NodeId::Plan,
    }
}

pub fn route_after_plan(state: &WorkflowState) -> Next {
    match state.plan_action() {
        Some(PlanAction::ListVms | PlanAction::SecurityScan) => Next::Node(NodeId::Discover),
        Some(PlanAction::Invalid) | None => Next::End,
    }
}

pub fn route_after_discovery(state: &WorkflowState) -> Next {
    match state.plan_action() {
        Some(PlanAction::ListVms) => Next::End,
        _ if state.targets.is_empty() => Next::Node(NodeId::Analyze),
        _ => Next::Node(NodeId::Execute),
    }
}

pub fn route_after_execute(_state: &WorkflowState) -> Next {
    Next::Node(NodeId::Analyze)
}

pub fn route_to_end(_state: &WorkflowState) -> Next {
    Next::End
}
