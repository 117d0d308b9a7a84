//! Core abstractions for the flow engine
//!
//! This crate provides the schema model, per-task state (variables, status,
//! snapshots, I/O, messages), the graph document, and the executor contract
//! that all other components depend on. It contains no scheduler.

mod context;
mod document;
mod error;
mod events;
mod io;
mod message;
mod node;
mod report;
mod schema;
mod snapshot;
mod status;
mod value;
mod variable;

pub use context::RunContext;
pub use document::{
    Container, FlowEdge, FlowNode, FlowPort, PortType, WorkflowDocument, ROOT_CONTAINER,
};
pub use error::{ExecutorError, FlowError, ResolutionError, WorkflowError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, TaskId};
pub use io::IoCenter;
pub use message::{MessageCenter, MessageLevel, NodeMessage};
pub use node::{
    BlockRunner, ExecutionContext, ExecutionOutput, FiredPorts, LoopControl, LoopSignal,
    NodeExecutor, NodeMetadata,
};
pub use report::{NodeReport, Report};
pub use schema::{node_types, EdgeSchema, JsonSchema, NodeData, NodeSchema, WorkflowSchema};
pub use snapshot::{Snapshot, SnapshotCenter, SnapshotData, SnapshotUpdate};
pub use status::{StatusCenter, StatusEntry, StatusExport, WorkflowStatus};
pub use value::{display_value, FlowValue, TypedValue, VariableType};
pub use variable::{SetVariable, Variable, VariableStore, GLOBAL_SCOPE};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
