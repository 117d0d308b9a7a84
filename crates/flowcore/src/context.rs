use crate::document::WorkflowDocument;
use crate::events::{EventBus, EventEmitter, TaskId};
use crate::io::IoCenter;
use crate::message::MessageCenter;
use crate::snapshot::SnapshotCenter;
use crate::status::StatusCenter;
use crate::variable::VariableStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything one task owns while it runs. Never shared across tasks.
pub struct RunContext {
    pub task_id: TaskId,
    pub document: Arc<WorkflowDocument>,
    pub variables: VariableStore,
    pub status: StatusCenter,
    pub snapshots: SnapshotCenter,
    pub io: IoCenter,
    pub messages: Arc<MessageCenter>,
    pub events: EventBus,
    pub cancellation: CancellationToken,
}

impl RunContext {
    pub fn new(
        task_id: TaskId,
        document: Arc<WorkflowDocument>,
        inputs: Map<String, Value>,
        events: EventBus,
    ) -> Self {
        Self {
            task_id,
            document,
            variables: VariableStore::new(),
            status: StatusCenter::new(),
            snapshots: SnapshotCenter::new(),
            io: IoCenter::new(inputs),
            messages: Arc::new(MessageCenter::new()),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn emitter(&self, node_id: &str) -> EventEmitter {
        self.events
            .create_emitter(self.task_id, node_id, self.messages.clone())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
