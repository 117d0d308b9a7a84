use crate::registry::NodeRegistry;
use async_trait::async_trait;
use chrono::Utc;
use flowcore::{
    BlockRunner, Container, ExecutionContext, ExecutionEvent, ExecutionOutput, ExecutorError,
    FiredPorts, FlowEdge, FlowNode, LoopSignal, ResolutionError, RunContext, SetVariable,
    Snapshot, SnapshotUpdate, VariableStore, WorkflowStatus, GLOBAL_SCOPE,
};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Walks a workflow document, dispatching ready nodes concurrently
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: Arc<NodeRegistry>,
    max_parallel: usize,
}

/// How a single node invocation ended
#[derive(Debug, Clone, PartialEq)]
enum NodeOutcome {
    Succeeded(FiredPorts),
    Failed(String),
    Canceled,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<NodeRegistry>, max_parallel: usize) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                max_parallel: max_parallel.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.inner.registry
    }

    /// Run a task's workflow until it reaches a terminal status
    pub async fn execute(&self, run: Arc<RunContext>) -> WorkflowStatus {
        let workflow = run.status.workflow().clone();
        if !workflow.begin() {
            return workflow.status();
        }
        let start_time = Instant::now();
        run.events.emit(ExecutionEvent::WorkflowStarted {
            task_id: run.task_id,
            timestamp: Utc::now(),
        });
        info!(task_id = %run.task_id, "Starting workflow execution");

        seed_global_variables(&run);
        let root = run.document.root().clone();
        let result = self
            .run_container(run.clone(), root, run.variables.clone(), None)
            .await;

        match result {
            Ok(()) => {
                workflow.success();
            }
            Err(ExecutorError::Cancelled) => {
                workflow.cancel();
            }
            Err(e) => {
                error!(task_id = %run.task_id, error = %e, "Workflow failed");
                workflow.fail();
            }
        }

        let status = workflow.status();
        let duration_ms = start_time.elapsed().as_millis() as u64;
        info!(task_id = %run.task_id, %status, duration_ms, "Workflow finished");
        run.events.emit(ExecutionEvent::WorkflowFinished {
            task_id: run.task_id,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
        status
    }

    /// Execute one container's nodes with parallelism, honouring fired
    /// ports, fail-fast and loop signals
    async fn run_container(
        &self,
        run: Arc<RunContext>,
        container: Container,
        variables: VariableStore,
        signal: Option<LoopSignal>,
    ) -> Result<(), ExecutorError> {
        let mut schedule = Schedule::new(container);
        let mut ready: VecDeque<Arc<FlowNode>> = schedule.entry_nodes().into();
        let mut running = FuturesUnordered::new();
        let mut failure: Option<ExecutorError> = None;

        loop {
            while running.len() < self.inner.max_parallel {
                let halted = failure.is_some()
                    || run.is_cancelled()
                    || signal.as_ref().is_some_and(LoopSignal::is_raised);
                if halted {
                    ready.clear();
                    break;
                }
                let Some(node) = ready.pop_front() else {
                    break;
                };

                let node_id = node.id.clone();
                let handle = tokio::spawn(self.clone().execute_node(
                    run.clone(),
                    node,
                    variables.clone(),
                    signal.clone(),
                ));
                running.push(async move { (node_id, handle.await) });
            }

            // Nothing running means nothing can become ready
            let Some((node_id, joined)) = running.next().await else {
                break;
            };

            match joined {
                Ok(NodeOutcome::Succeeded(ports)) => {
                    ready.extend(schedule.complete(&node_id, &ports));
                }
                Ok(NodeOutcome::Failed(message)) => {
                    failure.get_or_insert(ExecutorError::ExecutionFailed(format!(
                        "node '{}' failed: {}",
                        node_id, message
                    )));
                }
                Ok(NodeOutcome::Canceled) => {}
                Err(join_error) => {
                    let message = format!("node task aborted: {}", join_error);
                    error!(task_id = %run.task_id, %node_id, error = %message, "Node failed");
                    run.status.node_status(&node_id).fail();
                    run.status.workflow().fail();
                    run.events.emit(ExecutionEvent::NodeFailed {
                        task_id: run.task_id,
                        node_id: node_id.clone(),
                        error: message.clone(),
                        timestamp: Utc::now(),
                    });
                    failure.get_or_insert(ExecutorError::ExecutionFailed(format!(
                        "node '{}' failed: {}",
                        node_id, message
                    )));
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }
        if run.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }

    async fn execute_node(
        self,
        run: Arc<RunContext>,
        node: Arc<FlowNode>,
        variables: VariableStore,
        signal: Option<LoopSignal>,
    ) -> NodeOutcome {
        if run.is_cancelled() {
            return NodeOutcome::Canceled;
        }
        let status = run.status.node_status(&node.id);
        status.process();
        let snapshot = run.snapshots.create(node.id.clone(), node.data.to_value());
        let start = Instant::now();

        run.events.emit(ExecutionEvent::NodeStarted {
            task_id: run.task_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            timestamp: Utc::now(),
        });
        debug!(task_id = %run.task_id, node_id = %node.id, node_type = %node.node_type, "Node started");

        let result = AssertUnwindSafe(self.invoke(
            &run,
            &node,
            variables.clone(),
            signal,
            snapshot.clone(),
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ExecutorError::ExecutionFailed(format!(
                "executor panicked: {}",
                panic_message(panic.as_ref())
            )))
        });
        snapshot.finish();

        match result {
            Ok(output) => {
                if !status.success() {
                    // Canceled while the executor kept running
                    debug!(task_id = %run.task_id, node_id = %node.id, "Discarding outputs of canceled node");
                    return NodeOutcome::Canceled;
                }
                store_outputs(&variables, &node, &output.outputs);
                snapshot.add_data(
                    SnapshotUpdate::outputs(output.outputs.clone())
                        .with_branch(output.branch().map(str::to_string)),
                );

                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(task_id = %run.task_id, node_id = %node.id, duration_ms, "Node succeeded");
                run.events.emit(ExecutionEvent::NodeSucceeded {
                    task_id: run.task_id,
                    node_id: node.id.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                NodeOutcome::Succeeded(output.ports)
            }
            Err(ExecutorError::Cancelled) => {
                snapshot.add_data(SnapshotUpdate::error(ExecutorError::Cancelled.to_string()));
                status.cancel();
                info!(task_id = %run.task_id, node_id = %node.id, "Node canceled");
                run.events.emit(ExecutionEvent::NodeCanceled {
                    task_id: run.task_id,
                    node_id: node.id.clone(),
                    timestamp: Utc::now(),
                });
                NodeOutcome::Canceled
            }
            Err(e) => {
                let message = e.to_string();
                snapshot.add_data(SnapshotUpdate::error(message.clone()));
                if !status.fail() {
                    return NodeOutcome::Canceled;
                }
                run.status.workflow().fail();
                error!(task_id = %run.task_id, node_id = %node.id, error = %message, "Node failed");
                run.events.emit(ExecutionEvent::NodeFailed {
                    task_id: run.task_id,
                    node_id: node.id.clone(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                NodeOutcome::Failed(message)
            }
        }
    }

    async fn invoke(
        &self,
        run: &Arc<RunContext>,
        node: &Arc<FlowNode>,
        variables: VariableStore,
        signal: Option<LoopSignal>,
        snapshot: Snapshot,
    ) -> Result<ExecutionOutput, ExecutorError> {
        let executor = self
            .inner
            .registry
            .get(&node.node_type)
            .ok_or_else(|| ExecutorError::UnknownNodeType(node.node_type.clone()))?;

        let inputs = resolve_inputs(node, &variables)?;
        snapshot.add_data(SnapshotUpdate::inputs(inputs.clone()));

        let ctx = ExecutionContext {
            node: node.clone(),
            inputs,
            variables,
            snapshot,
            run: run.clone(),
            events: run.emitter(&node.id),
            signal,
            cancellation: run.cancellation.clone(),
            runner: Arc::new(self.clone()),
        };
        executor.execute(ctx).await
    }
}

#[async_trait]
impl BlockRunner for WorkflowEngine {
    async fn run_block(
        &self,
        ctx: &ExecutionContext,
        variables: VariableStore,
        signal: LoopSignal,
    ) -> Result<(), ExecutorError> {
        let body = ctx.node.body.clone().ok_or_else(|| {
            ExecutorError::Configuration(format!("node '{}' has no body", ctx.node.id))
        })?;
        self.run_container(ctx.run.clone(), body, variables, Some(signal))
            .await
    }
}

/// Resolve `inputsValues`, checking them against declared `inputs` when the
/// node declares any
fn resolve_inputs(
    node: &FlowNode,
    variables: &VariableStore,
) -> Result<Map<String, Value>, ResolutionError> {
    let mut inputs = Map::new();
    let Some(values) = &node.data.inputs_values else {
        return Ok(inputs);
    };
    let declared = node.data.inputs.as_ref().and_then(|s| s.properties.as_ref());

    for (key, value) in values {
        let typed = variables.resolve(value)?;
        if let Some(properties) = declared {
            let property = properties
                .get(key)
                .ok_or_else(|| ResolutionError::UndeclaredInput(key.clone()))?;
            if let Some(expected) = property.schema_type {
                if !expected.accepts(typed.value_type) {
                    return Err(ResolutionError::TypeMismatch {
                        key: key.clone(),
                        expected: expected.to_string(),
                        actual: typed.value_type.to_string(),
                    });
                }
            }
        }
        inputs.insert(key.clone(), typed.value);
    }
    Ok(inputs)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn store_outputs(variables: &VariableStore, node: &FlowNode, outputs: &Map<String, Value>) {
    let declared = node.outputs_schema();
    for (key, value) in outputs {
        variables.set_variable(SetVariable::declared(
            node.id.clone(),
            key.clone(),
            value.clone(),
            declared.and_then(|schema| schema.property(key)),
        ));
    }
}

fn seed_global_variables(run: &RunContext) {
    let Some(properties) = run
        .document
        .global_variable()
        .and_then(|schema| schema.properties.as_ref())
    else {
        return;
    };
    for (key, property) in properties {
        let value = property.default.clone().unwrap_or(Value::Null);
        run.variables.set_variable(SetVariable::declared(
            GLOBAL_SCOPE,
            key.clone(),
            value,
            Some(property),
        ));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeState {
    Pending,
    Taken,
    Skipped,
}

/// Edge traversal state for one container run
struct Schedule {
    container: Container,
    edges: Vec<EdgeState>,
    visited: HashSet<String>,
}

impl Schedule {
    fn new(container: Container) -> Self {
        let edges = vec![EdgeState::Pending; container.edges.len()];
        Self {
            container,
            edges,
            visited: HashSet::new(),
        }
    }

    fn entry_nodes(&mut self) -> Vec<Arc<FlowNode>> {
        let entries = self.container.entry_nodes();
        self.visited.extend(entries.iter().map(|n| n.id.clone()));
        entries
    }

    /// Settle the outbound edges of a finished node and return the nodes
    /// that became ready. Nodes whose inbound edges were all skipped are
    /// skipped in turn.
    fn complete(&mut self, node_id: &str, ports: &FiredPorts) -> Vec<Arc<FlowNode>> {
        let mut newly_ready = Vec::new();
        let mut settled: VecDeque<(String, FiredPorts)> = VecDeque::new();
        settled.push_back((node_id.to_string(), ports.clone()));

        while let Some((source, ports)) = settled.pop_front() {
            let mut targets = Vec::new();
            for (index, edge) in self.container.edges.iter().enumerate() {
                if edge.from != source {
                    continue;
                }
                self.edges[index] = if fires(&ports, edge) {
                    EdgeState::Taken
                } else {
                    EdgeState::Skipped
                };
                if !targets.contains(&edge.to) {
                    targets.push(edge.to.clone());
                }
            }

            for target in targets {
                if self.visited.contains(&target) {
                    continue;
                }
                let inbound: Vec<EdgeState> = self
                    .container
                    .edges
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.to == target)
                    .map(|(i, _)| self.edges[i])
                    .collect();
                if inbound.contains(&EdgeState::Pending) {
                    continue;
                }
                self.visited.insert(target.clone());
                if inbound.contains(&EdgeState::Taken) {
                    match self.container.node(&target) {
                        Some(node) => newly_ready.push(node.clone()),
                        None => warn!(node_id = %target, "Edge target missing from container"),
                    }
                } else {
                    debug!(node_id = %target, "Node unreachable, skipping");
                    settled.push_back((target, FiredPorts::Nothing));
                }
            }
        }
        newly_ready
    }
}

fn fires(ports: &FiredPorts, edge: &FlowEdge) -> bool {
    match ports {
        FiredPorts::All => true,
        FiredPorts::Only(port) => edge.from_port.as_deref() == Some(port.as_str()),
        FiredPorts::Nothing => false,
    }
}
