//! Statement: the transactional buffer of pending scheduling operations
//!
//! Operations mutate session state the moment they are appended; external
//! side-effects are deferred. `commit` drains the log forward and
//! dispatches binds/evictions in append order; `discard` rewinds the log
//! in reverse, restoring idle/releasing and every task status exactly.

use tracing::debug;

use gangway_core::{PodVolumes, Result, TaskId, TaskStatus};

use super::session::Session;

#[derive(Debug)]
enum Operation {
    Allocate {
        task: TaskId,
        node: String,
        pod_volumes: Option<PodVolumes>,
    },
    Pipeline {
        task: TaskId,
        node: String,
    },
    Evict {
        task: TaskId,
        reason: String,
        prev_status: TaskStatus,
    },
}

#[derive(Debug, Default)]
pub struct Statement {
    ops: Vec<Operation>,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of evictions queued so far.
    pub fn evictions(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, Operation::Evict { .. }))
            .count()
    }

    pub fn allocate(
        &mut self,
        ssn: &mut Session,
        task: &TaskId,
        node: &str,
        pod_volumes: Option<PodVolumes>,
    ) -> Result<()> {
        ssn.apply_allocate(task, node)?;
        self.ops.push(Operation::Allocate {
            task: task.clone(),
            node: node.to_string(),
            pod_volumes,
        });
        Ok(())
    }

    pub fn pipeline(&mut self, ssn: &mut Session, task: &TaskId, node: &str) -> Result<()> {
        ssn.apply_pipeline(task, node)?;
        self.ops.push(Operation::Pipeline {
            task: task.clone(),
            node: node.to_string(),
        });
        Ok(())
    }

    pub fn evict(&mut self, ssn: &mut Session, task: &TaskId, reason: &str) -> Result<()> {
        let prev_status = ssn.apply_evict(task)?;
        self.ops.push(Operation::Evict {
            task: task.clone(),
            reason: reason.to_string(),
            prev_status,
        });
        Ok(())
    }

    /// Apply the log for real: dispatch binds and evictions in order.
    /// Dispatch failures are logged and retried by a later cycle; the
    /// session state keeps the committed shape either way.
    pub async fn commit(self, ssn: &mut Session) {
        debug!(ops = self.ops.len(), "committing statement");
        for op in &self.ops {
            match op {
                Operation::Allocate {
                    task,
                    node,
                    pod_volumes,
                } => {
                    ssn.dispatch_bind(task, node, pod_volumes.as_ref()).await;
                }
                Operation::Evict { task, reason, .. } => {
                    ssn.dispatch_evict(task, reason).await;
                }
                Operation::Pipeline { .. } => {}
            }
        }
    }

    /// Undo the log in reverse; the session ends up exactly where it was
    /// before the statement opened.
    pub fn discard(mut self, ssn: &mut Session) {
        debug!(ops = self.ops.len(), "discarding statement");
        while let Some(op) = self.ops.pop() {
            let result = match &op {
                Operation::Allocate { task, node, .. } => ssn.undo_allocate(task, node),
                Operation::Pipeline { task, node } => ssn.undo_pipeline(task, node),
                Operation::Evict {
                    task, prev_status, ..
                } => ssn.undo_evict(task, *prev_status),
            };
            if let Err(err) = result {
                tracing::error!(?op, %err, "failed to unwind statement operation");
            }
        }
    }
}
