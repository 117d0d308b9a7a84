use crate::engine::WorkflowEngine;
use crate::registry::NodeRegistry;
use crate::task::Task;
use crate::validation::{validate_inputs, validate_schema};
use flowcore::{
    EventBus, ExecutionEvent, FlowError, Report, RunContext, TaskId, WorkflowSchema,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Entry point for running workflows. Owns the executor registry and every
/// task it has started.
pub struct WorkflowApplication {
    engine: WorkflowEngine,
    retention: Option<Duration>,
    tasks: RwLock<HashMap<TaskId, Arc<Task>>>,
    events: EventBus,
}

impl WorkflowApplication {
    pub fn new(registry: NodeRegistry) -> Self {
        Self::with_config(registry, RuntimeConfig::default())
    }

    pub fn with_config(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        Self {
            engine: WorkflowEngine::new(Arc::new(registry), config.max_parallel_nodes),
            retention: config.task_retention_ms.map(Duration::from_millis),
            tasks: RwLock::new(HashMap::new()),
            events: EventBus::new(config.event_buffer_size),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.engine.registry()
    }

    /// Validate a schema and its inputs, then start a task in the background.
    /// Must be called from within a tokio runtime.
    pub fn run(
        &self,
        schema: &WorkflowSchema,
        inputs: Map<String, Value>,
    ) -> Result<TaskId, FlowError> {
        let document = validate_schema(schema).map_err(FlowError::Validation)?;
        let inputs = validate_inputs(&document, inputs)?;
        self.prune_expired();

        let task_id = Uuid::new_v4();
        let run = Arc::new(RunContext::new(
            task_id,
            Arc::new(document),
            inputs,
            self.events.clone(),
        ));
        let task = Task::launch(self.engine.clone(), run);
        self.tasks.write().insert(task_id, task);
        tracing::info!(%task_id, "Task started");
        Ok(task_id)
    }

    /// Check a schema without running it
    pub fn validate(&self, schema: &WorkflowSchema) -> Result<(), FlowError> {
        validate_schema(schema)
            .map(|_| ())
            .map_err(FlowError::Validation)
    }

    pub fn task(&self, task_id: &TaskId) -> Option<Arc<Task>> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn cancel(&self, task_id: &TaskId) -> bool {
        self.task(task_id).is_some_and(|task| task.cancel())
    }

    pub fn report(&self, task_id: &TaskId) -> Option<Report> {
        self.task(task_id).map(|task| task.report())
    }

    pub fn result(&self, task_id: &TaskId) -> Option<Map<String, Value>> {
        self.task(task_id).and_then(|task| task.result())
    }

    /// Forget a settled task and its state. Tasks whose engine is still
    /// running are kept.
    pub fn dispose(&self, task_id: &TaskId) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get(task_id) {
            Some(task) if task.is_settled() => {
                tasks.remove(task_id);
                true
            }
            _ => false,
        }
    }

    /// Drop settled tasks kept longer than the configured retention.
    /// Runs on every `run`; returns how many tasks were removed.
    pub fn prune_expired(&self) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| task.settled_for().map_or(true, |age| age < retention));
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned expired tasks");
        }
        removed
    }

    /// Subscribe to execution events of every task
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }
}

/// Configuration for the application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// How long a settled task stays queryable; `None` keeps it until
    /// `dispose`
    pub task_retention_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            task_retention_ms: Some(3_600_000),
        }
    }
}
