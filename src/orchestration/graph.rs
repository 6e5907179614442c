use crate::orchestration::merge::StateDelta;
use crate::orchestration::node::{Next, NodeId};
use crate::orchestration::router;
use crate::orchestration::state::WorkflowState;
use crate::orchestration::steps::{self, StepContext};

pub type StepFn = fn(&WorkflowState, &StepContext<'_>) -> StateDelta;
pub type RouteFn = fn(&WorkflowState) -> Next;

#[derive(Clone, Copy)]
pub struct NodeSpec {
    pub executor: StepFn,
    pub router: RouteFn,
}

/// The workflow graph. Exhaustive over `NodeId`, so adding a node without an
/// executor and outgoing edge does not compile.
pub fn node_spec(node: NodeId) -> NodeSpec {
    match node {
        NodeId::Plan => NodeSpec {
            executor: steps::execute_plan,
            router: router::route_after_plan,
        },
        NodeId::Discover => NodeSpec {
            executor: steps::execute_discovery,
            router: router::route_after_discovery,
        },
        NodeId::Execute => NodeSpec {
            executor: steps::execute_scan,
            router: router::route_after_execute,
        },
        NodeId::Analyze => NodeSpec {
            executor: steps::execute_analysis,
            router: router::route_to_end,
        },
        NodeId::SendNotification => NodeSpec {
            executor: steps::execute_notification,
            router: router::route_to_end,
        },
        NodeId::StartCloning => NodeSpec {
            executor: steps::execute_cloning,
            router: router::route_to_end,
        },
    }
}
