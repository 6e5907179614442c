pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod fan_out;
pub mod graph;
pub mod merge;
pub mod node;
pub mod router;
pub mod session_lock;
pub mod state;
pub mod steps;

pub use engine::{RunOutcome, RunStatus, WorkflowEngine};
pub use error::WorkflowError;
