//! Task projection: one pending or running pod as the scheduler sees it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pod::{Pod, PodPhase, PreemptPolicy};
use crate::resource::Resource;

/// Pod UID, stable across the pod's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Allocated,
    Pipelined,
    Bound,
    Running,
    Releasing,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskStatus {
    /// Statuses that hold node resources right now.
    pub fn is_occupied(&self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated | TaskStatus::Bound | TaskStatus::Running
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl From<PodPhase> for TaskStatus {
    fn from(phase: PodPhase) -> Self {
        match phase {
            PodPhase::Pending => TaskStatus::Pending,
            PodPhase::Running => TaskStatus::Running,
            PodPhase::Succeeded => TaskStatus::Succeeded,
            PodPhase::Failed => TaskStatus::Failed,
            PodPhase::Unknown => TaskStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub uid: TaskId,
    pub job: crate::job::JobId,
    pub namespace: String,
    pub name: String,
    /// Current request, adjusted as the task moves through the cycle.
    pub resreq: Resource,
    /// Original request, compared against future free capacity when
    /// pipelining.
    pub init_resreq: Resource,
    pub node_name: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub preempt_policy: PreemptPolicy,
    pub preemptable: bool,
    /// Zero resource request; placed only by backfill.
    pub best_effort: bool,
    pub pod: Pod,
    pub creation_timestamp: DateTime<Utc>,
}

impl TaskInfo {
    /// Project a pod observed in the snapshot into a task.
    pub fn from_pod(job: crate::job::JobId, pod: &Pod, preemptable: bool, priority: i32) -> Self {
        let resreq = pod.spec.resources.clone();
        let status = if pod.is_terminating() {
            TaskStatus::Releasing
        } else if pod.phase == PodPhase::Pending && pod.node_name.is_some() {
            TaskStatus::Bound
        } else {
            TaskStatus::from(pod.phase)
        };
        Self {
            uid: TaskId(pod.uid.clone()),
            job,
            namespace: pod.namespace.clone(),
            name: pod.name.clone(),
            best_effort: resreq.is_empty(),
            init_resreq: resreq.clone(),
            resreq,
            node_name: pod.node_name.clone(),
            status,
            priority,
            preempt_policy: PreemptPolicy::default(),
            preemptable,
            pod: pod.clone(),
            creation_timestamp: pod.creation_timestamp,
        }
    }

    /// Stable default ordering: priority desc, then creation time, then UID.
    pub fn default_cmp(l: &TaskInfo, r: &TaskInfo) -> std::cmp::Ordering {
        r.priority
            .cmp(&l.priority)
            .then_with(|| l.creation_timestamp.cmp(&r.creation_timestamp))
            .then_with(|| l.uid.cmp(&r.uid))
    }
}
