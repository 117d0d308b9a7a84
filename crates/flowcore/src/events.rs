use crate::message::{MessageCenter, MessageLevel};
use crate::status::WorkflowStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub type TaskId = Uuid;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    WorkflowFinished {
        task_id: TaskId,
        status: WorkflowStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        task_id: TaskId,
        node_id: String,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeSucceeded {
        task_id: TaskId,
        node_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        task_id: TaskId,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeCanceled {
        task_id: TaskId,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeMessage {
        task_id: TaskId,
        node_id: String,
        level: MessageLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Event emitter handed to node executors. Messages go to the task's
/// message center and to live subscribers.
#[derive(Clone)]
pub struct EventEmitter {
    task_id: TaskId,
    node_id: String,
    sender: broadcast::Sender<ExecutionEvent>,
    messages: Arc<MessageCenter>,
}

impl EventEmitter {
    pub fn new(
        task_id: TaskId,
        node_id: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
        messages: Arc<MessageCenter>,
    ) -> Self {
        Self {
            task_id,
            node_id: node_id.into(),
            sender,
            messages,
        }
    }

    pub fn emit(&self, level: MessageLevel, message: impl Into<String>) {
        let recorded = self.messages.push(&self.node_id, level, message);
        let _ = self.sender.send(ExecutionEvent::NodeMessage {
            task_id: self.task_id,
            node_id: self.node_id.clone(),
            level,
            message: recorded.message,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(MessageLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(MessageLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(MessageLevel::Error, message);
    }
}

/// Broadcast channel for execution events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(
        &self,
        task_id: TaskId,
        node_id: impl Into<String>,
        messages: Arc<MessageCenter>,
    ) -> EventEmitter {
        EventEmitter::new(task_id, node_id, self.sender.clone(), messages)
    }
}
