use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// One recorded node invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub id: String,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

/// Partial update applied through [`Snapshot::add_data`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotUpdate {
    pub inputs: Option<Map<String, Value>>,
    pub outputs: Option<Map<String, Value>>,
    pub data: Option<Value>,
    pub branch: Option<String>,
    pub error: Option<String>,
}

impl SnapshotUpdate {
    pub fn inputs(inputs: Map<String, Value>) -> Self {
        Self {
            inputs: Some(inputs),
            ..Self::default()
        }
    }

    pub fn outputs(outputs: Map<String, Value>) -> Self {
        Self {
            outputs: Some(outputs),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }
}

/// Handle to a snapshot that is filled in as the invocation proceeds
#[derive(Debug, Clone)]
pub struct Snapshot {
    data: Arc<RwLock<SnapshotData>>,
}

impl Snapshot {
    pub fn id(&self) -> String {
        self.data.read().id.clone()
    }

    pub fn node_id(&self) -> String {
        self.data.read().node_id.clone()
    }

    pub fn add_data(&self, update: SnapshotUpdate) {
        let mut data = self.data.write();
        if let Some(inputs) = update.inputs {
            data.inputs = inputs;
        }
        if let Some(outputs) = update.outputs {
            data.outputs = outputs;
        }
        if let Some(extra) = update.data {
            data.data = extra;
        }
        if update.branch.is_some() {
            data.branch = update.branch;
        }
        if update.error.is_some() {
            data.error = update.error;
        }
    }

    /// Record the end time; later calls keep the first
    pub fn finish(&self) {
        let mut data = self.data.write();
        if data.end_time.is_none() {
            data.end_time = Some(Utc::now().timestamp_millis());
        }
    }

    pub fn export(&self) -> SnapshotData {
        self.data.read().clone()
    }
}

/// Append-only record of every node invocation in a task
#[derive(Debug, Default)]
pub struct SnapshotCenter {
    snapshots: RwLock<Vec<Snapshot>>,
}

impl SnapshotCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, node_id: impl Into<String>, data: Value) -> Snapshot {
        let snapshot = Snapshot {
            data: Arc::new(RwLock::new(SnapshotData {
                id: Uuid::new_v4().to_string(),
                node_id: node_id.into(),
                data,
                start_time: Utc::now().timestamp_millis(),
                ..SnapshotData::default()
            })),
        };
        self.snapshots.write().push(snapshot.clone());
        snapshot
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshots grouped by node id, in creation order
    pub fn export(&self) -> BTreeMap<String, Vec<SnapshotData>> {
        let mut grouped: BTreeMap<String, Vec<SnapshotData>> = BTreeMap::new();
        for snapshot in self.snapshots.read().iter() {
            let data = snapshot.export();
            grouped.entry(data.node_id.clone()).or_default().push(data);
        }
        grouped
    }
}
