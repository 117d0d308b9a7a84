use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Log,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMessage {
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub level: MessageLevel,
    pub message: String,
    pub timestamp: i64,
}

/// Messages emitted by node executors, in emission order
#[derive(Debug, Default)]
pub struct MessageCenter {
    messages: RwLock<Vec<NodeMessage>>,
}

impl MessageCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, node_id: &str, level: MessageLevel, message: impl Into<String>) -> NodeMessage {
        let message = NodeMessage {
            node_id: node_id.to_string(),
            level,
            message: message.into(),
            timestamp: Utc::now().timestamp_millis(),
        };
        self.messages.write().push(message.clone());
        message
    }

    pub fn export(&self) -> Vec<NodeMessage> {
        self.messages.read().clone()
    }
}
