//! Snapshot cache: the scheduler's in-memory view of the cluster
//!
//! Informer-style feeds mutate the cache behind a reader-writer lock;
//! `snapshot()` materializes an immutable value-clone for one session, so
//! concurrent cycles never observe a partially-updated view.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{debug, warn};

use gangway_core::{
    HyperNodeTree, JobId, JobInfo, NodeInfo, NodeUsage, Pod, PodGroup, PreemptPolicy,
    PriorityClass, QueueId, QueueInfo, Resource, TaskInfo,
};

/// Label carried by every pod that belongs to a podgroup.
pub const POD_GROUP_LABEL: &str = "gangway.sh/pod-group";
/// Label opting a pod out of preemption and reclaim.
pub const PREEMPTABLE_LABEL: &str = "gangway.sh/preemptable";

#[derive(Debug, Clone)]
struct NodeEntry {
    allocatable: Resource,
    labels: BTreeMap<String, String>,
    taints: Vec<gangway_core::Taint>,
    unschedulable: bool,
    usage: NodeUsage,
}

#[derive(Default)]
struct CacheState {
    pods: HashMap<String, Pod>,
    pod_groups: HashMap<JobId, PodGroup>,
    queues: HashMap<QueueId, QueueInfo>,
    priority_classes: HashMap<String, PriorityClass>,
    nodes: HashMap<String, NodeEntry>,
    hypernodes: HyperNodeTree,
}

/// The frozen view one session works on.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub jobs: HashMap<JobId, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub queues: HashMap<QueueId, QueueInfo>,
    pub priority_classes: HashMap<String, PriorityClass>,
    pub hypernodes: HyperNodeTree,
    pub total_resource: Resource,
}

#[derive(Default)]
pub struct SchedulerCache {
    state: RwLock<CacheState>,
}

impl SchedulerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.write().pods.insert(pod.uid.clone(), pod);
    }

    pub fn delete_pod(&self, uid: &str) {
        self.state.write().pods.remove(uid);
    }

    pub fn add_pod_group(&self, pod_group: PodGroup) {
        let key = JobId(format!("{}/{}", pod_group.namespace, pod_group.name));
        self.state.write().pod_groups.insert(key, pod_group);
    }

    pub fn delete_pod_group(&self, namespace: &str, name: &str) {
        let key = JobId(format!("{namespace}/{name}"));
        self.state.write().pod_groups.remove(&key);
    }

    pub fn add_queue(&self, queue: QueueInfo) {
        self.state.write().queues.insert(queue.uid.clone(), queue);
    }

    pub fn delete_queue(&self, uid: &QueueId) {
        self.state.write().queues.remove(uid);
    }

    pub fn add_priority_class(&self, pc: PriorityClass) {
        self.state
            .write()
            .priority_classes
            .insert(pc.name.clone(), pc);
    }

    pub fn add_node(
        &self,
        name: &str,
        allocatable: Resource,
        labels: BTreeMap<String, String>,
        taints: Vec<gangway_core::Taint>,
        unschedulable: bool,
    ) {
        self.state.write().nodes.insert(
            name.to_string(),
            NodeEntry {
                allocatable,
                labels,
                taints,
                unschedulable,
                usage: NodeUsage::default(),
            },
        );
    }

    pub fn delete_node(&self, name: &str) {
        self.state.write().nodes.remove(name);
    }

    /// Feed a windowed utilization sample for one node.
    pub fn update_node_usage(&self, name: &str, usage: NodeUsage) {
        if let Some(entry) = self.state.write().nodes.get_mut(name) {
            entry.usage = usage;
        }
    }

    pub fn set_hypernodes(&self, tree: HyperNodeTree) {
        self.state.write().hypernodes = tree;
    }

    /// Materialize the current view. Pure value clone; the cache keeps no
    /// references into the result.
    pub fn snapshot(&self) -> ClusterSnapshot {
        let state = self.state.read();

        let mut snapshot = ClusterSnapshot {
            queues: state.queues.clone(),
            priority_classes: state.priority_classes.clone(),
            hypernodes: state.hypernodes.clone(),
            ..Default::default()
        };

        // Jobs from podgroups, tasks from their labeled pods.
        for (job_id, pod_group) in &state.pod_groups {
            let mut job = JobInfo::new(job_id.clone(), pod_group.clone());
            if let Some(pc_name) = &pod_group.priority_class_name {
                if let Some(pc) = state.priority_classes.get(pc_name) {
                    job.priority = pc.value;
                }
            }
            snapshot.jobs.insert(job_id.clone(), job);
        }

        for pod in state.pods.values() {
            let Some(group_name) = pod.labels.get(POD_GROUP_LABEL) else {
                continue;
            };
            let job_id = JobId(format!("{}/{}", pod.namespace, group_name));
            let Some(job) = snapshot.jobs.get_mut(&job_id) else {
                debug!(pod = %pod.name, group = %group_name, "pod references an unknown podgroup");
                continue;
            };
            let preemptable = pod
                .labels
                .get(PREEMPTABLE_LABEL)
                .map(|v| v != "false")
                .unwrap_or(true);
            let priority = pod
                .spec
                .priority_class_name
                .as_ref()
                .and_then(|n| state.priority_classes.get(n))
                .map(|pc| pc.value)
                .unwrap_or(job.priority);
            let mut task = TaskInfo::from_pod(job_id.clone(), pod, preemptable, priority);
            task.preempt_policy = pod
                .spec
                .priority_class_name
                .as_ref()
                .and_then(|n| state.priority_classes.get(n))
                .map(|pc| pc.preempt_policy)
                .unwrap_or(PreemptPolicy::default());
            job.add_task(task);
        }

        // Nodes: idle = allocatable − Σ used(non-terminal pods).
        for (name, entry) in &state.nodes {
            let mut node = NodeInfo::new(name, entry.allocatable.clone());
            node.labels = entry.labels.clone();
            node.taints = entry.taints.clone();
            node.unschedulable = entry.unschedulable;
            node.usage = entry.usage.clone();
            snapshot.total_resource.add(&entry.allocatable);
            snapshot.nodes.insert(name.clone(), node);
        }

        for job in snapshot.jobs.values() {
            for task in job.tasks.values() {
                let Some(node_name) = &task.node_name else {
                    continue;
                };
                let Some(node) = snapshot.nodes.get_mut(node_name) else {
                    warn!(task = %task.name, node = %node_name, "task placed on unknown node");
                    continue;
                };
                if task.status.is_terminal() {
                    continue;
                }
                if let Err(err) = node.add_task(&task.uid, &task.job, &task.resreq, task.status) {
                    warn!(task = %task.name, node = %node_name, %err, "node accounting overflow in snapshot");
                }
            }
        }

        // Pods outside any podgroup still occupy their node.
        for pod in state.pods.values() {
            if pod.labels.contains_key(POD_GROUP_LABEL) || pod.phase.is_terminal() {
                continue;
            }
            let Some(node_name) = &pod.node_name else {
                continue;
            };
            if let Some(node) = snapshot.nodes.get_mut(node_name) {
                if node.idle.sub(&pod.spec.resources).is_ok() {
                    node.used.add(&pod.spec.resources);
                }
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gangway_core::{PodGroupPhase, PodPhase, PodSpec, TaskStatus};

    fn pod(uid: &str, group: Option<&str>, milli_cpu: f64, phase: PodPhase, node: Option<&str>) -> Pod {
        let mut labels = BTreeMap::new();
        if let Some(group) = group {
            labels.insert(POD_GROUP_LABEL.to_string(), group.to_string());
        }
        Pod {
            uid: uid.into(),
            namespace: "default".into(),
            name: uid.into(),
            labels,
            annotations: Default::default(),
            spec: PodSpec {
                resources: Resource::new(milli_cpu, 0.0),
                ..Default::default()
            },
            phase,
            node_name: node.map(String::from),
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        }
    }

    fn pod_group(name: &str, min_member: u32) -> PodGroup {
        PodGroup {
            namespace: "default".into(),
            name: name.into(),
            min_member,
            min_resources: None,
            queue: "q1".into(),
            priority_class_name: None,
            phase: PodGroupPhase::Inqueue,
            creation_timestamp: Utc::now(),
        }
    }

    #[test]
    fn snapshot_indexes_jobs_and_nodes() {
        let cache = SchedulerCache::new();
        cache.add_node("n1", Resource::new(4000.0, 0.0), Default::default(), vec![], false);
        cache.add_queue(QueueInfo::new("q1", 1));
        cache.add_pod_group(pod_group("pg1", 1));
        cache.add_pod(pod("p1", Some("pg1"), 1000.0, PodPhase::Running, Some("n1")));
        cache.add_pod(pod("p2", Some("pg1"), 1000.0, PodPhase::Pending, None));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.jobs.len(), 1);
        let job = snapshot.jobs.values().next().unwrap();
        assert_eq!(job.tasks.len(), 2);
        assert_eq!(job.count_in(TaskStatus::Running), 1);
        assert_eq!(job.count_in(TaskStatus::Pending), 1);

        let node = &snapshot.nodes["n1"];
        assert_eq!(node.idle.milli_cpu, 3000.0);
        assert_eq!(node.used.milli_cpu, 1000.0);
        assert_eq!(snapshot.total_resource.milli_cpu, 4000.0);
    }

    #[test]
    fn unowned_pods_still_charge_their_node() {
        let cache = SchedulerCache::new();
        cache.add_node("n1", Resource::new(4000.0, 0.0), Default::default(), vec![], false);
        cache.add_pod(pod("daemon", None, 500.0, PodPhase::Running, Some("n1")));

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.nodes["n1"].idle.milli_cpu, 3500.0);
    }

    #[test]
    fn snapshot_is_a_value_clone() {
        let cache = SchedulerCache::new();
        cache.add_node("n1", Resource::new(4000.0, 0.0), Default::default(), vec![], false);
        let mut snap = cache.snapshot();
        snap.nodes.get_mut("n1").unwrap().idle = Resource::empty();

        // the cache did not observe the mutation
        assert_eq!(cache.snapshot().nodes["n1"].idle.milli_cpu, 4000.0);
    }
}
