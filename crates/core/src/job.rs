//! Job projection: a podgroup plus the tasks scheduled under it

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FitErrors;
use crate::resource::Resource;
use crate::task::{TaskId, TaskInfo, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodGroupPhase {
    #[default]
    Pending,
    Inqueue,
    Running,
    Unknown,
}

/// The scheduler-visible projection of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodGroup {
    pub namespace: String,
    pub name: String,
    pub min_member: u32,
    #[serde(default)]
    pub min_resources: Option<Resource>,
    pub queue: crate::queue::QueueId,
    #[serde(default)]
    pub priority_class_name: Option<String>,
    #[serde(default)]
    pub phase: PodGroupPhase,
    pub creation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JobInfo {
    pub uid: JobId,
    pub namespace: String,
    pub name: String,
    pub queue: crate::queue::QueueId,
    pub priority: i32,
    pub min_available: u32,
    pub pod_group: PodGroup,
    pub tasks: HashMap<TaskId, TaskInfo>,
    /// status -> task ids; `∑ index[s] == tasks` at all times.
    pub task_status_index: HashMap<TaskStatus, HashSet<TaskId>>,
    /// Per-task fit diagnostics collected during the cycle.
    pub nodes_fit_errors: HashMap<TaskId, FitErrors>,
    /// Lowest common ancestor hypernode of all placed tasks, when network
    /// topology is in play.
    pub lca_hyper_node: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
}

impl JobInfo {
    pub fn new(uid: JobId, pod_group: PodGroup) -> Self {
        Self {
            uid,
            namespace: pod_group.namespace.clone(),
            name: pod_group.name.clone(),
            queue: pod_group.queue.clone(),
            priority: 0,
            min_available: pod_group.min_member,
            creation_timestamp: pod_group.creation_timestamp,
            pod_group,
            tasks: HashMap::new(),
            task_status_index: HashMap::new(),
            nodes_fit_errors: HashMap::new(),
            lca_hyper_node: None,
        }
    }

    pub fn add_task(&mut self, task: TaskInfo) {
        self.task_status_index
            .entry(task.status)
            .or_default()
            .insert(task.uid.clone());
        self.tasks.insert(task.uid.clone(), task);
    }

    pub fn delete_task(&mut self, uid: &TaskId) -> Option<TaskInfo> {
        let task = self.tasks.remove(uid)?;
        if let Some(set) = self.task_status_index.get_mut(&task.status) {
            set.remove(uid);
            if set.is_empty() {
                self.task_status_index.remove(&task.status);
            }
        }
        Some(task)
    }

    /// Move a task between status buckets, keeping the index invariant.
    pub fn update_task_status(&mut self, uid: &TaskId, status: TaskStatus) {
        let Some(task) = self.tasks.get_mut(uid) else {
            return;
        };
        let old = task.status;
        if old == status {
            return;
        }
        task.status = status;
        if let Some(set) = self.task_status_index.get_mut(&old) {
            set.remove(uid);
            if set.is_empty() {
                self.task_status_index.remove(&old);
            }
        }
        self.task_status_index
            .entry(status)
            .or_default()
            .insert(uid.clone());
    }

    pub fn tasks_in(&self, status: TaskStatus) -> impl Iterator<Item = &TaskInfo> {
        self.task_status_index
            .get(&status)
            .into_iter()
            .flatten()
            .filter_map(|uid| self.tasks.get(uid))
    }

    pub fn count_in(&self, status: TaskStatus) -> u32 {
        self.task_status_index
            .get(&status)
            .map(|s| s.len() as u32)
            .unwrap_or(0)
    }

    /// Tasks occupying node resources plus the ones already finished
    /// successfully; the gang readiness numerator.
    pub fn ready_task_num(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status.is_occupied() || t.status == TaskStatus::Succeeded)
            .count() as u32
    }

    /// Ready plus pipelined tasks; the gang pipelining numerator.
    pub fn pipelined_task_num(&self) -> u32 {
        self.ready_task_num() + self.count_in(TaskStatus::Pipelined)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_task_num() >= self.min_available
    }

    pub fn is_pipelined(&self) -> bool {
        self.pipelined_task_num() >= self.min_available
    }

    /// Has the gang not yet got what it asked for.
    pub fn is_starving(&self) -> bool {
        !self.is_pipelined()
    }

    /// Sum of requests currently charged against nodes.
    pub fn allocated(&self) -> Resource {
        let mut total = Resource::empty();
        for task in self.tasks.values() {
            if task.status.is_occupied() {
                total.add(&task.resreq);
            }
        }
        total
    }

    /// The podgroup's declared floor, or the sum of pending requests when
    /// it declares none.
    pub fn min_resources(&self) -> Resource {
        if let Some(min) = &self.pod_group.min_resources {
            return min.clone();
        }
        let mut total = Resource::empty();
        for task in self.tasks.values() {
            total.add(&task.resreq);
        }
        total
    }

    /// Resources held above the declared floor; reclaimable without
    /// breaking the gang.
    pub fn elastic_resources(&self) -> Resource {
        let allocated = self.allocated();
        let min = self.min_resources();
        let (elastic, _) = allocated.diff(&min, crate::resource::DimensionSet::All);
        elastic
    }

    /// Stable default ordering: creation time, then UID.
    pub fn default_cmp(l: &JobInfo, r: &JobInfo) -> std::cmp::Ordering {
        l.creation_timestamp
            .cmp(&r.creation_timestamp)
            .then_with(|| l.uid.cmp(&r.uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::{Pod, PodPhase, PodSpec};

    fn pod_group(min_member: u32) -> PodGroup {
        PodGroup {
            namespace: "default".into(),
            name: "pg".into(),
            min_member,
            min_resources: None,
            queue: "q1".into(),
            priority_class_name: None,
            phase: PodGroupPhase::Pending,
            creation_timestamp: Utc::now(),
        }
    }

    fn task(uid: &str, status: TaskStatus) -> TaskInfo {
        let pod = Pod {
            uid: uid.into(),
            namespace: "default".into(),
            name: uid.into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: PodSpec {
                resources: Resource::new(1000.0, 0.0),
                ..Default::default()
            },
            phase: PodPhase::Pending,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        };
        let mut t = TaskInfo::from_pod("job-1".into(), &pod, true, 0);
        t.status = status;
        t
    }

    #[test]
    fn status_index_tracks_tasks() {
        let mut job = JobInfo::new("job-1".into(), pod_group(2));
        job.add_task(task("a", TaskStatus::Pending));
        job.add_task(task("b", TaskStatus::Pending));
        assert_eq!(job.count_in(TaskStatus::Pending), 2);

        job.update_task_status(&"a".into(), TaskStatus::Allocated);
        assert_eq!(job.count_in(TaskStatus::Pending), 1);
        assert_eq!(job.count_in(TaskStatus::Allocated), 1);

        let indexed: usize = job.task_status_index.values().map(|s| s.len()).sum();
        assert_eq!(indexed, job.tasks.len());
    }

    #[test]
    fn readiness_counts_occupied_and_succeeded() {
        let mut job = JobInfo::new("job-1".into(), pod_group(2));
        job.add_task(task("a", TaskStatus::Running));
        job.add_task(task("b", TaskStatus::Succeeded));
        job.add_task(task("c", TaskStatus::Pending));
        assert!(job.is_ready());

        let mut starving = JobInfo::new("job-2".into(), pod_group(3));
        starving.add_task(task("a", TaskStatus::Running));
        starving.add_task(task("b", TaskStatus::Pipelined));
        assert!(!starving.is_ready());
        assert!(starving.is_starving());

        starving.add_task(task("c", TaskStatus::Pipelined));
        assert!(starving.is_pipelined());
        assert!(!starving.is_starving());
    }
}
