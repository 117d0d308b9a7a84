use crate::context::RunContext;
use crate::events::TaskId;
use crate::message::NodeMessage;
use crate::snapshot::SnapshotData;
use crate::status::{StatusExport, WorkflowStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Read-only view of a task's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: TaskId,
    pub inputs: Map<String, Value>,
    pub outputs: Map<String, Value>,
    pub workflow_status: StatusExport,
    pub reports: BTreeMap<String, NodeReport>,
    pub messages: Vec<NodeMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    #[serde(flatten)]
    pub status: StatusExport,
    pub snapshots: Vec<SnapshotData>,
}

impl Report {
    /// Compose a report from the task's centers without touching engine state
    pub fn export(run: &RunContext) -> Self {
        let mut snapshots = run.snapshots.export();
        let reports = run
            .status
            .export_nodes()
            .into_iter()
            .map(|(node_id, status)| {
                let snapshots = snapshots.remove(&node_id).unwrap_or_default();
                (node_id, NodeReport { status, snapshots })
            })
            .collect();
        Self {
            id: run.task_id,
            inputs: run.io.inputs(),
            outputs: run.io.outputs(),
            workflow_status: run.status.workflow().export(),
            reports,
            messages: run.messages.export(),
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.workflow_status.status
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeReport> {
        self.reports.get(node_id)
    }
}
