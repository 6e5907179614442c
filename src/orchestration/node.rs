use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeId {
    Plan,
    Discover,
    Execute,
    Analyze,
    SendNotification,
    StartCloning,
}

impl NodeId {
    pub const ALL: [NodeId; 6] = [
        NodeId::Plan,
        NodeId::Discover,
        NodeId::Execute,
        NodeId::Analyze,
        NodeId::SendNotification,
        NodeId::StartCloning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Discover => "discover",
            Self::Execute => "execute",
            Self::Analyze => "analyze",
            Self::SendNotification => "send-notification",
            Self::StartCloning => "start-cloning",
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A routing decision: another node, or the terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Node(NodeId),
    End,
}

impl Next {
    pub fn node(self) -> Option<NodeId> {
        match self {
            Self::Node(node) => Some(node),
            Self::End => None,
        }
    }
}

impl std::fmt::Display for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(node) => node.fmt(f),
            Self::End => write!(f, "end"),
        }
    }
}
