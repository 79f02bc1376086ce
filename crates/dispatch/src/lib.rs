//! # Promptweave Dispatch
//!
//! The workflow graph dispatch engine: per-request graph instantiation,
//! the feed/fan-out propagation loop, node executors, the stream emitter,
//! and the response aggregation handed to persistence/billing
//! collaborators.

pub mod dispatcher;
pub mod emitter;
pub mod executors;
pub mod state;

pub use dispatcher::{
    BranchFailurePolicy, FlowDispatcher, FlowOutcome, FlowRequest, RunPolicy,
};
pub use emitter::StreamEmitter;
pub use executors::{
    ExecutorContext, ExecutorOutput, ExecutorRegistry, NodeExecutor, RunDeps, UsageReport,
};
pub use state::{ExecutionState, NodePhase, RuntimeNode};
