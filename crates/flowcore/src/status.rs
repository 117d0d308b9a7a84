use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Succeeded | WorkflowStatus::Failed | WorkflowStatus::Canceled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Processing => "processing",
            WorkflowStatus::Succeeded => "succeeded",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct StatusState {
    status: WorkflowStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl StatusState {
    fn time_cost(&self) -> i64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            (Some(start), None) => (Utc::now() - start).num_milliseconds(),
            _ => 0,
        }
    }
}

/// Status state machine for a node or the whole workflow
#[derive(Debug, Clone)]
pub struct StatusEntry {
    id: String,
    state: Arc<RwLock<StatusState>>,
}

impl StatusEntry {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Arc::new(RwLock::new(StatusState {
                status: WorkflowStatus::Pending,
                start_time: None,
                end_time: None,
            })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.state.read().status
    }

    pub fn terminated(&self) -> bool {
        self.status().is_terminal()
    }

    /// Enter `Processing` from `Pending` or a terminal state. A node inside a
    /// loop is processed again on every iteration.
    pub fn process(&self) -> bool {
        let mut state = self.state.write();
        if state.status == WorkflowStatus::Processing {
            return false;
        }
        state.status = WorkflowStatus::Processing;
        state.start_time = Some(Utc::now());
        state.end_time = None;
        true
    }

    /// Enter `Processing` only from `Pending`
    pub fn begin(&self) -> bool {
        let mut state = self.state.write();
        if state.status != WorkflowStatus::Pending {
            return false;
        }
        state.status = WorkflowStatus::Processing;
        state.start_time = Some(Utc::now());
        true
    }

    pub fn success(&self) -> bool {
        self.finish(WorkflowStatus::Succeeded)
    }

    pub fn fail(&self) -> bool {
        self.finish(WorkflowStatus::Failed)
    }

    pub fn cancel(&self) -> bool {
        self.finish(WorkflowStatus::Canceled)
    }

    /// Terminal transitions are no-ops once terminal. Returns whether the
    /// transition happened.
    fn finish(&self, status: WorkflowStatus) -> bool {
        let mut state = self.state.write();
        if state.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        if state.start_time.is_none() {
            state.start_time = Some(now);
        }
        state.status = status;
        state.end_time = Some(now);
        true
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().end_time
    }

    /// Milliseconds between start and end, or start and now while running
    pub fn time_cost(&self) -> i64 {
        self.state.read().time_cost()
    }

    pub fn export(&self) -> StatusExport {
        let state = self.state.read();
        StatusExport {
            id: self.id.clone(),
            status: state.status,
            terminated: state.status.is_terminal(),
            start_time: state.start_time.map(|t| t.timestamp_millis()),
            end_time: state.end_time.map(|t| t.timestamp_millis()),
            time_cost: state.time_cost(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusExport {
    pub id: String,
    pub status: WorkflowStatus,
    pub terminated: bool,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub time_cost: i64,
}

/// One state machine per node id plus one for the workflow
#[derive(Debug)]
pub struct StatusCenter {
    workflow: StatusEntry,
    nodes: RwLock<BTreeMap<String, StatusEntry>>,
}

impl StatusCenter {
    pub fn new() -> Self {
        Self {
            workflow: StatusEntry::new("workflow"),
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn workflow(&self) -> &StatusEntry {
        &self.workflow
    }

    /// Returns the node's state machine, creating it on first use
    pub fn node_status(&self, node_id: &str) -> StatusEntry {
        if let Some(entry) = self.nodes.read().get(node_id) {
            return entry.clone();
        }
        self.nodes
            .write()
            .entry(node_id.to_string())
            .or_insert_with(|| StatusEntry::new(node_id))
            .clone()
    }

    pub fn get_status_node_ids(&self, status: WorkflowStatus) -> Vec<String> {
        self.nodes
            .read()
            .iter()
            .filter(|(_, entry)| entry.status() == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn export_nodes(&self) -> BTreeMap<String, StatusExport> {
        self.nodes
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.export()))
            .collect()
    }
}

impl Default for StatusCenter {
    fn default() -> Self {
        Self::new()
    }
}
