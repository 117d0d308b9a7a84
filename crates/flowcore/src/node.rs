use crate::context::RunContext;
use crate::document::FlowNode;
use crate::error::ExecutorError;
use crate::events::EventEmitter;
use crate::snapshot::Snapshot;
use crate::value::{FlowValue, TypedValue};
use crate::variable::VariableStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that every node type implements
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Node type handled by this executor (e.g. "http", "condition")
    fn node_type(&self) -> &str;

    /// Run one invocation of a node
    async fn execute(&self, ctx: ExecutionContext) -> Result<ExecutionOutput, ExecutorError>;

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Runs the body of a container node. Implemented by the engine and handed
/// to executors so a loop can drive its body without knowing the scheduler.
#[async_trait]
pub trait BlockRunner: Send + Sync {
    async fn run_block(
        &self,
        ctx: &ExecutionContext,
        variables: VariableStore,
        signal: LoopSignal,
    ) -> Result<(), ExecutorError>;
}

/// Execution context passed to each node invocation
#[derive(Clone)]
pub struct ExecutionContext {
    pub node: Arc<FlowNode>,

    /// `inputsValues` resolved against the variable store
    pub inputs: Map<String, Value>,

    /// Variable scope the node runs in
    pub variables: VariableStore,

    /// Snapshot of this invocation
    pub snapshot: Snapshot,

    pub run: Arc<RunContext>,

    pub events: EventEmitter,

    /// Loop control flag of the innermost enclosing loop body
    pub signal: Option<LoopSignal>,

    pub cancellation: CancellationToken,

    pub runner: Arc<dyn BlockRunner>,
}

impl ExecutionContext {
    pub fn node_id(&self) -> &str {
        &self.node.id
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, ExecutorError> {
        self.inputs
            .get(name)
            .ok_or_else(|| ExecutorError::MissingInput(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ExecutorError> {
        let value = self.require_input(name)?;
        value.as_str().ok_or_else(|| ExecutorError::InvalidInputType {
            field: name.to_string(),
            expected: "string".to_string(),
            actual: crate::value::VariableType::of(value).to_string(),
        })
    }

    /// Deserialize node-specific configuration from the node data
    pub fn config<T: DeserializeOwned>(&self) -> Result<T, ExecutorError> {
        self.node
            .data
            .config()
            .map_err(|e| ExecutorError::Configuration(format!("{}: {}", self.node.id, e)))
    }

    /// Resolve a value expression in this node's scope
    pub fn resolve(&self, value: &FlowValue) -> Result<TypedValue, ExecutorError> {
        Ok(self.variables.resolve(value)?)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Which outbound ports fire after a node succeeds
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FiredPorts {
    #[default]
    All,
    /// Only edges leaving through this port id
    Only(String),
    Nothing,
}

/// Output from node execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    pub outputs: Map<String, Value>,
    pub ports: FiredPorts,
}

impl ExecutionOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(outputs: Map<String, Value>) -> Self {
        Self {
            outputs,
            ports: FiredPorts::All,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_ports(mut self, ports: FiredPorts) -> Self {
        self.ports = ports;
        self
    }

    pub fn branch(&self) -> Option<&str> {
        match &self.ports {
            FiredPorts::Only(port) => Some(port),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Break,
    Continue,
}

/// Flag raised by `break`/`continue` and inspected by the loop after each
/// body run. `Break` wins over `Continue`.
#[derive(Debug, Clone, Default)]
pub struct LoopSignal {
    control: Arc<Mutex<Option<LoopControl>>>,
}

impl LoopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, control: LoopControl) {
        let mut current = self.control.lock();
        if *current != Some(LoopControl::Break) {
            *current = Some(control);
        }
    }

    pub fn get(&self) -> Option<LoopControl> {
        *self.control.lock()
    }

    pub fn is_raised(&self) -> bool {
        self.get().is_some()
    }
}

/// Descriptive information about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
