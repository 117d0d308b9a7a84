use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Validation failed: {}", format_errors(.0))]
    Validation(Vec<WorkflowError>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_errors(errors: &[WorkflowError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure raised while a node runs. Fails the owning node only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No executor registered for node type '{0}'")]
    UnknownNodeType(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// A value expression that could not be turned into a concrete value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Reference {0} does not resolve to a variable")]
    UnresolvedRef(String),

    #[error("Template token '{{{{{0}}}}}' does not resolve to a variable")]
    UnresolvedTemplateToken(String),

    #[error("Reference path is empty")]
    EmptyRef,

    #[error("Expression values are not supported: {0}")]
    UnsupportedExpression(String),

    #[error("Input '{0}' is not declared")]
    UndeclaredInput(String),

    #[error("Input '{key}' expected type {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },
}

/// Malformed workflow schema. Fatal before a run starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Edge {edge} references node '{node}' outside its container")]
    DanglingEdge { edge: String, node: String },

    #[error("Edge {edge} leaves node '{node}' through unknown port '{port}'")]
    UnknownPort {
        edge: String,
        node: String,
        port: String,
    },

    #[error("Cyclic dependency detected in container '{0}'")]
    CyclicDependency(String),

    #[error("Workflow must contain exactly one start node, found {0}")]
    StartNodeCount(usize),

    #[error("Workflow has no end node")]
    MissingEndNode,

    #[error("Node '{node}' of type '{node_type}' must be inside a loop body")]
    OutsideLoop { node: String, node_type: String },

    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),
}
