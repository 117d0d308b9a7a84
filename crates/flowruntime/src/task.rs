use crate::engine::WorkflowEngine;
use flowcore::{Report, RunContext, TaskId, WorkflowStatus};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

/// Final status of a task whose engine has stopped, and when it stopped
#[derive(Debug, Clone, Copy)]
struct Settled {
    status: WorkflowStatus,
    at: Instant,
}

/// One execution of a workflow
pub struct Task {
    id: TaskId,
    run: Arc<RunContext>,
    finished: watch::Receiver<Option<Settled>>,
}

impl Task {
    /// Spawn the engine for `run` on the current tokio runtime
    pub(crate) fn launch(engine: WorkflowEngine, run: Arc<RunContext>) -> Arc<Self> {
        let (sender, finished) = watch::channel(None);
        let id = run.task_id;
        let task = Arc::new(Self {
            id,
            run: run.clone(),
            finished,
        });

        tokio::spawn(
            async move {
                let status = engine.execute(run).await;
                let _ = sender.send(Some(Settled {
                    status,
                    at: Instant::now(),
                }));
            }
            .instrument(info_span!("task", task_id = %id)),
        );
        task
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.run.status.workflow().status()
    }

    /// True once the engine has stopped, including in-flight nodes that
    /// outlived a fail-fast failure
    pub fn is_settled(&self) -> bool {
        self.finished.borrow().is_some()
    }

    /// Time since the engine stopped
    pub fn settled_for(&self) -> Option<Duration> {
        self.finished.borrow().map(|settled| settled.at.elapsed())
    }

    /// Cancel the task. Returns false if it had already settled.
    pub fn cancel(&self) -> bool {
        let status = &self.run.status;
        if !status.workflow().cancel() {
            return false;
        }
        self.run.cancellation.cancel();
        for node_id in status.get_status_node_ids(WorkflowStatus::Processing) {
            status.node_status(&node_id).cancel();
        }
        info!(task_id = %self.id, "Task canceled");
        true
    }

    pub fn report(&self) -> Report {
        Report::export(&self.run)
    }

    /// Workflow outputs, available once the task is terminal
    pub fn result(&self) -> Option<Map<String, Value>> {
        if self.status().is_terminal() {
            Some(self.run.io.outputs())
        } else {
            None
        }
    }

    /// Wait for the engine to stop and return the final status
    pub async fn wait(&self) -> WorkflowStatus {
        let mut finished = self.finished.clone();
        loop {
            if let Some(settled) = *finished.borrow_and_update() {
                return settled.status;
            }
            if finished.changed().await.is_err() {
                return self.status();
            }
        }
    }
}
