//! Cluster fixtures for exercising the scheduler without a control plane
//!
//! Builds snapshots through the real cache so tests observe the same
//! indexing the production path does, plus recording ports that capture
//! dispatched binds and evictions.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use gangway_core::{
    Pod, PodGroup, PodGroupPhase, PodPhase, PodSpec, PodVolumes, PreemptPolicy, PriorityClass,
    QueueInfo, Resource, TaskInfo,
};
use gangway_ports::{
    Binder, Evictor, NullPodGroupClient, NullRecorder, PortResult,
};

use crate::cache::{ClusterSnapshot, SchedulerCache, POD_GROUP_LABEL, PREEMPTABLE_LABEL};
use crate::framework::SessionPorts;

pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Builds a `ClusterSnapshot` through the scheduler cache.
pub struct SnapshotBuilder {
    cache: SchedulerCache,
    sequence: i64,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            cache: SchedulerCache::new(),
            sequence: 0,
        }
    }

    fn timestamp(&mut self) -> chrono::DateTime<Utc> {
        self.sequence += 1;
        Utc.timestamp_opt(1_700_000_000 + self.sequence, 0).unwrap()
    }

    pub fn queue(self, name: &str, weight: u32) -> Self {
        self.queue_info(QueueInfo::new(name, weight))
    }

    pub fn queue_info(self, queue: QueueInfo) -> Self {
        self.cache.add_queue(queue);
        self
    }

    /// Node with the given milli-cpu and a roomy default memory.
    pub fn node(self, name: &str, milli_cpu: f64) -> Self {
        self.node_mem(name, milli_cpu, 64.0 * GIB)
    }

    pub fn node_mem(self, name: &str, milli_cpu: f64, memory: f64) -> Self {
        self.cache.add_node(
            name,
            Resource::new(milli_cpu, memory),
            BTreeMap::new(),
            vec![],
            false,
        );
        self
    }

    pub fn priority_class(self, name: &str, value: i32, preempt_policy: PreemptPolicy) -> Self {
        self.cache.add_priority_class(PriorityClass {
            name: name.to_string(),
            value,
            preempt_policy,
        });
        self
    }

    pub fn pod_group(mut self, name: &str, queue: &str, min_member: u32) -> Self {
        let ts = self.timestamp();
        self.cache.add_pod_group(PodGroup {
            namespace: "default".into(),
            name: name.into(),
            min_member,
            min_resources: None,
            queue: queue.into(),
            priority_class_name: None,
            phase: PodGroupPhase::Inqueue,
            creation_timestamp: ts,
        });
        self
    }

    pub fn pod_group_full(self, pod_group: PodGroup) -> Self {
        self.cache.add_pod_group(pod_group);
        self
    }

    /// Podgroup plus pending tasks, ready for allocation.
    pub fn job(mut self, name: &str, queue: &str, min_member: u32, pending: &[(&str, f64)]) -> Self {
        self = self.pod_group(name, queue, min_member);
        for (pod, milli_cpu) in pending {
            self = self.pending_task(name, pod, *milli_cpu);
        }
        self
    }

    pub fn pending_task(self, job: &str, pod: &str, milli_cpu: f64) -> Self {
        self.add_pod(job, pod, milli_cpu, PodPhase::Pending, None, true, None)
    }

    pub fn pending_task_pc(self, job: &str, pod: &str, milli_cpu: f64, pc: &str) -> Self {
        self.add_pod(job, pod, milli_cpu, PodPhase::Pending, None, true, Some(pc))
    }

    pub fn running_task(
        self,
        job: &str,
        pod: &str,
        milli_cpu: f64,
        node: &str,
        preemptable: bool,
    ) -> Self {
        self.add_pod(job, pod, milli_cpu, PodPhase::Running, Some(node), preemptable, None)
    }

    pub fn running_task_pc(
        self,
        job: &str,
        pod: &str,
        milli_cpu: f64,
        node: &str,
        preemptable: bool,
        pc: &str,
    ) -> Self {
        self.add_pod(
            job,
            pod,
            milli_cpu,
            PodPhase::Running,
            Some(node),
            preemptable,
            Some(pc),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn add_pod(
        mut self,
        job: &str,
        pod: &str,
        milli_cpu: f64,
        phase: PodPhase,
        node: Option<&str>,
        preemptable: bool,
        priority_class: Option<&str>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(POD_GROUP_LABEL.to_string(), job.to_string());
        if !preemptable {
            labels.insert(PREEMPTABLE_LABEL.to_string(), "false".to_string());
        }
        let ts = self.timestamp();
        self.cache.add_pod(Pod {
            uid: pod.to_string(),
            namespace: "default".into(),
            name: pod.to_string(),
            labels,
            annotations: BTreeMap::new(),
            spec: PodSpec {
                resources: Resource::new(milli_cpu, GIB),
                priority_class_name: priority_class.map(String::from),
                scheduler_name: "gangway".into(),
                ..Default::default()
            },
            phase,
            node_name: node.map(String::from),
            deletion_timestamp: None,
            creation_timestamp: ts,
        });
        self
    }

    pub fn cache(&self) -> &SchedulerCache {
        &self.cache
    }

    pub fn build(self) -> ClusterSnapshot {
        self.cache.snapshot()
    }
}

/// Evictor that records the name of every task it is asked to evict.
#[derive(Default, Clone)]
pub struct RecordingEvictor {
    pub evicted: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Evictor for RecordingEvictor {
    async fn evict(&self, task: &TaskInfo, _reason: &str) -> PortResult<()> {
        self.evicted.lock().push(task.name.clone());
        Ok(())
    }
}

/// Binder that records (task, node) pairs.
#[derive(Default, Clone)]
pub struct RecordingBinder {
    pub bound: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Binder for RecordingBinder {
    async fn bind(
        &self,
        task: &TaskInfo,
        node_name: &str,
        _pod_volumes: Option<&PodVolumes>,
    ) -> PortResult<()> {
        self.bound.lock().push((task.name.clone(), node_name.to_string()));
        Ok(())
    }
}

/// Session ports that capture binds and evictions for assertions.
pub fn recording_ports() -> (SessionPorts, RecordingBinder, RecordingEvictor) {
    let binder = RecordingBinder::default();
    let evictor = RecordingEvictor::default();
    let ports = SessionPorts {
        binder: Arc::new(binder.clone()),
        evictor: Arc::new(evictor.clone()),
        pod_groups: Arc::new(NullPodGroupClient),
        recorder: Arc::new(NullRecorder),
    };
    (ports, binder, evictor)
}
