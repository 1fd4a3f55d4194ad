//! The per-cycle scheduling session
//!
//! A session wraps one cluster snapshot, exposes the plugin registration
//! points, and owns the only mutable scheduling state of the cycle.
//! Mutations happen exclusively through statement operations; plugin
//! functions read the session and never write it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gangway_core::{
    FitErrors, HyperNodeTree, JobId, JobInfo, NodeInfo, PodGroupPhase, PriorityClass, QueueId,
    QueueInfo, Resource, Result, SchedError, TaskId, TaskInfo, TaskStatus,
};
use gangway_ports::{Binder, EventRecorder, Evictor, EventType, PodGroupClient};

use super::config::{SchedulerConf, Tier};
use super::registry;
use super::{
    AllocatableFn, BatchNodeOrderFn, BestNodeFn, CompareClusterFn, CompareJobFn,
    CompareNamespaceFn, CompareQueueFn, CompareTaskFn, EvictableFn, HyperNodeOrderFn,
    JobEnqueuedFn, JobValidFn, NodeMapFn, NodeOrderFn, NodeReduceFn, OverusedFn, Plugin,
    PredicateFn, PreemptiveFn, PrePredicateFn, ReservedNodesFn, TargetJobFn, ValidateJobFn,
    VictimCompareQueueFn, VictimTasksFn, VoteJobFn,
};
use crate::cache::ClusterSnapshot;

/// Side-effect notification fired synchronously by statement operations.
#[derive(Debug, Clone)]
pub struct Event {
    pub task: TaskId,
    pub job: JobId,
    pub queue: QueueId,
    pub resreq: Resource,
}

type EventFn = Box<dyn Fn(&Event) + Send + Sync>;

/// Subscription to statement side-effects. Handlers must be cheap and
/// must not touch session state beyond their own captured shares.
#[derive(Default)]
pub struct EventHandler {
    pub allocate: Option<EventFn>,
    pub deallocate: Option<EventFn>,
}

/// Ports a session dispatches through on commit and close.
#[derive(Clone)]
pub struct SessionPorts {
    pub binder: Arc<dyn Binder>,
    pub evictor: Arc<dyn Evictor>,
    pub pod_groups: Arc<dyn PodGroupClient>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl SessionPorts {
    /// Ports wired to null adapters; dry runs and tests.
    pub fn noop() -> Self {
        Self {
            binder: Arc::new(gangway_ports::NullBinder),
            evictor: Arc::new(gangway_ports::NullEvictor),
            pod_groups: Arc::new(gangway_ports::NullPodGroupClient),
            recorder: Arc::new(gangway_ports::NullRecorder),
        }
    }
}

pub struct Session {
    pub uid: Uuid,
    pub jobs: HashMap<JobId, JobInfo>,
    pub nodes: HashMap<String, NodeInfo>,
    pub queues: HashMap<QueueId, QueueInfo>,
    pub priority_classes: HashMap<String, PriorityClass>,
    pub hypernodes: HyperNodeTree,
    pub total_resource: Resource,
    pub tiers: Vec<Tier>,
    pub cancel: CancellationToken,

    pub(crate) ports: SessionPorts,
    task_to_job: HashMap<TaskId, JobId>,
    initial_phases: HashMap<JobId, PodGroupPhase>,
    plugins: Vec<Box<dyn Plugin>>,

    pub(crate) job_order_fns: HashMap<String, CompareJobFn>,
    pub(crate) queue_order_fns: HashMap<String, CompareQueueFn>,
    pub(crate) victim_queue_order_fns: HashMap<String, VictimCompareQueueFn>,
    pub(crate) task_order_fns: HashMap<String, CompareTaskFn>,
    pub(crate) namespace_order_fns: HashMap<String, CompareNamespaceFn>,
    pub(crate) cluster_order_fns: HashMap<String, CompareClusterFn>,
    pub(crate) preemptable_fns: HashMap<String, EvictableFn>,
    pub(crate) reclaimable_fns: HashMap<String, EvictableFn>,
    pub(crate) job_ready_fns: HashMap<String, ValidateJobFn>,
    pub(crate) job_pipelined_fns: HashMap<String, VoteJobFn>,
    pub(crate) job_starving_fns: HashMap<String, ValidateJobFn>,
    pub(crate) job_valid_fns: HashMap<String, JobValidFn>,
    pub(crate) job_enqueueable_fns: HashMap<String, VoteJobFn>,
    pub(crate) job_enqueued_fns: HashMap<String, JobEnqueuedFn>,
    pub(crate) overused_fns: HashMap<String, OverusedFn>,
    pub(crate) preemptive_fns: HashMap<String, PreemptiveFn>,
    pub(crate) allocatable_fns: HashMap<String, AllocatableFn>,
    pub(crate) predicate_fns: HashMap<String, PredicateFn>,
    pub(crate) pre_predicate_fns: HashMap<String, PrePredicateFn>,
    pub(crate) node_order_fns: HashMap<String, NodeOrderFn>,
    pub(crate) batch_node_order_fns: HashMap<String, BatchNodeOrderFn>,
    pub(crate) node_map_fns: HashMap<String, NodeMapFn>,
    pub(crate) node_reduce_fns: HashMap<String, NodeReduceFn>,
    pub(crate) best_node_fns: HashMap<String, BestNodeFn>,
    pub(crate) target_job_fns: HashMap<String, TargetJobFn>,
    pub(crate) reserved_nodes_fns: HashMap<String, ReservedNodesFn>,
    pub(crate) victim_tasks_fns: HashMap<String, Vec<VictimTasksFn>>,
    pub(crate) hyper_node_order_fns: HashMap<String, HyperNodeOrderFn>,
    event_handlers: Vec<EventHandler>,
}

impl Session {
    /// Open a session over a snapshot: wire the configured tiers and run
    /// every plugin's `on_session_open`.
    pub fn open(snapshot: ClusterSnapshot, conf: &SchedulerConf, ports: SessionPorts) -> Self {
        let mut task_to_job = HashMap::new();
        for job in snapshot.jobs.values() {
            for uid in job.tasks.keys() {
                task_to_job.insert(uid.clone(), job.uid.clone());
            }
        }
        let initial_phases = snapshot
            .jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.pod_group.phase))
            .collect();

        let mut ssn = Session {
            uid: Uuid::new_v4(),
            jobs: snapshot.jobs,
            nodes: snapshot.nodes,
            queues: snapshot.queues,
            priority_classes: snapshot.priority_classes,
            hypernodes: snapshot.hypernodes,
            total_resource: snapshot.total_resource,
            tiers: conf.tiers.clone(),
            cancel: CancellationToken::new(),
            ports,
            task_to_job,
            initial_phases,
            plugins: Vec::new(),
            job_order_fns: HashMap::new(),
            queue_order_fns: HashMap::new(),
            victim_queue_order_fns: HashMap::new(),
            task_order_fns: HashMap::new(),
            namespace_order_fns: HashMap::new(),
            cluster_order_fns: HashMap::new(),
            preemptable_fns: HashMap::new(),
            reclaimable_fns: HashMap::new(),
            job_ready_fns: HashMap::new(),
            job_pipelined_fns: HashMap::new(),
            job_starving_fns: HashMap::new(),
            job_valid_fns: HashMap::new(),
            job_enqueueable_fns: HashMap::new(),
            job_enqueued_fns: HashMap::new(),
            overused_fns: HashMap::new(),
            preemptive_fns: HashMap::new(),
            allocatable_fns: HashMap::new(),
            predicate_fns: HashMap::new(),
            pre_predicate_fns: HashMap::new(),
            node_order_fns: HashMap::new(),
            batch_node_order_fns: HashMap::new(),
            node_map_fns: HashMap::new(),
            node_reduce_fns: HashMap::new(),
            best_node_fns: HashMap::new(),
            target_job_fns: HashMap::new(),
            reserved_nodes_fns: HashMap::new(),
            victim_tasks_fns: HashMap::new(),
            hyper_node_order_fns: HashMap::new(),
            event_handlers: Vec::new(),
        };

        let tiers = ssn.tiers.clone();
        let mut plugins = Vec::new();
        for tier in &tiers {
            for spec in &tier.plugins {
                match registry::new_plugin(&spec.name, spec.arguments.clone()) {
                    Some(mut plugin) => {
                        plugin.on_session_open(&mut ssn);
                        plugins.push(plugin);
                    }
                    None => warn!(plugin = %spec.name, "configured plugin is not registered"),
                }
            }
        }
        ssn.plugins = plugins;

        info!(session = %ssn.uid, jobs = ssn.jobs.len(), nodes = ssn.nodes.len(), "session opened");
        ssn
    }

    /// Close the session: run plugin teardown and flush podgroup phase
    /// changes to the cluster. Nothing may hold a reference past this.
    pub async fn close(mut self) {
        self.cancel.cancel();
        let mut plugins = std::mem::take(&mut self.plugins);
        for plugin in plugins.iter_mut() {
            plugin.on_session_close(&mut self);
        }

        for job in self.jobs.values_mut() {
            if job.pod_group.phase == PodGroupPhase::Inqueue && job.is_ready() {
                job.pod_group.phase = PodGroupPhase::Running;
            }
        }
        for (id, job) in &self.jobs {
            let initial = self.initial_phases.get(id).copied();
            if initial != Some(job.pod_group.phase) {
                if let Err(err) = self.ports.pod_groups.update_pod_group_status(&job.pod_group).await
                {
                    warn!(job = %id, %err, "failed to update podgroup status on close");
                }
            }
        }
        info!(session = %self.uid, "session closed");
    }

    // ---- registration points -------------------------------------------------

    pub fn add_job_order_fn(&mut self, plugin: &str, f: CompareJobFn) {
        self.job_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_queue_order_fn(&mut self, plugin: &str, f: CompareQueueFn) {
        self.queue_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_victim_queue_order_fn(&mut self, plugin: &str, f: VictimCompareQueueFn) {
        self.victim_queue_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_task_order_fn(&mut self, plugin: &str, f: CompareTaskFn) {
        self.task_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_namespace_order_fn(&mut self, plugin: &str, f: CompareNamespaceFn) {
        self.namespace_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_cluster_order_fn(&mut self, plugin: &str, f: CompareClusterFn) {
        self.cluster_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_preemptable_fn(&mut self, plugin: &str, f: EvictableFn) {
        self.preemptable_fns.insert(plugin.to_string(), f);
    }

    pub fn add_reclaimable_fn(&mut self, plugin: &str, f: EvictableFn) {
        self.reclaimable_fns.insert(plugin.to_string(), f);
    }

    pub fn add_job_ready_fn(&mut self, plugin: &str, f: ValidateJobFn) {
        self.job_ready_fns.insert(plugin.to_string(), f);
    }

    pub fn add_job_pipelined_fn(&mut self, plugin: &str, f: VoteJobFn) {
        self.job_pipelined_fns.insert(plugin.to_string(), f);
    }

    pub fn add_job_starving_fn(&mut self, plugin: &str, f: ValidateJobFn) {
        self.job_starving_fns.insert(plugin.to_string(), f);
    }

    pub fn add_job_valid_fn(&mut self, plugin: &str, f: JobValidFn) {
        self.job_valid_fns.insert(plugin.to_string(), f);
    }

    pub fn add_job_enqueueable_fn(&mut self, plugin: &str, f: VoteJobFn) {
        self.job_enqueueable_fns.insert(plugin.to_string(), f);
    }

    pub fn add_job_enqueued_fn(&mut self, plugin: &str, f: JobEnqueuedFn) {
        self.job_enqueued_fns.insert(plugin.to_string(), f);
    }

    pub fn add_overused_fn(&mut self, plugin: &str, f: OverusedFn) {
        self.overused_fns.insert(plugin.to_string(), f);
    }

    pub fn add_preemptive_fn(&mut self, plugin: &str, f: PreemptiveFn) {
        self.preemptive_fns.insert(plugin.to_string(), f);
    }

    pub fn add_allocatable_fn(&mut self, plugin: &str, f: AllocatableFn) {
        self.allocatable_fns.insert(plugin.to_string(), f);
    }

    pub fn add_predicate_fn(&mut self, plugin: &str, f: PredicateFn) {
        self.predicate_fns.insert(plugin.to_string(), f);
    }

    pub fn add_pre_predicate_fn(&mut self, plugin: &str, f: PrePredicateFn) {
        self.pre_predicate_fns.insert(plugin.to_string(), f);
    }

    pub fn add_node_order_fn(&mut self, plugin: &str, f: NodeOrderFn) {
        self.node_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_batch_node_order_fn(&mut self, plugin: &str, f: BatchNodeOrderFn) {
        self.batch_node_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_node_map_fn(&mut self, plugin: &str, f: NodeMapFn) {
        self.node_map_fns.insert(plugin.to_string(), f);
    }

    pub fn add_node_reduce_fn(&mut self, plugin: &str, f: NodeReduceFn) {
        self.node_reduce_fns.insert(plugin.to_string(), f);
    }

    pub fn add_best_node_fn(&mut self, plugin: &str, f: BestNodeFn) {
        self.best_node_fns.insert(plugin.to_string(), f);
    }

    pub fn add_target_job_fn(&mut self, plugin: &str, f: TargetJobFn) {
        self.target_job_fns.insert(plugin.to_string(), f);
    }

    pub fn add_reserved_nodes_fn(&mut self, plugin: &str, f: ReservedNodesFn) {
        self.reserved_nodes_fns.insert(plugin.to_string(), f);
    }

    pub fn add_victim_tasks_fns(&mut self, plugin: &str, fns: Vec<VictimTasksFn>) {
        self.victim_tasks_fns.insert(plugin.to_string(), fns);
    }

    pub fn add_hyper_node_order_fn(&mut self, plugin: &str, f: HyperNodeOrderFn) {
        self.hyper_node_order_fns.insert(plugin.to_string(), f);
    }

    pub fn add_event_handler(&mut self, handler: EventHandler) {
        self.event_handlers.push(handler);
    }

    // ---- data access ---------------------------------------------------------

    pub fn job(&self, id: &JobId) -> Option<&JobInfo> {
        self.jobs.get(id)
    }

    pub fn queue(&self, id: &QueueId) -> Option<&QueueInfo> {
        self.queues.get(id)
    }

    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.get(name)
    }

    pub fn task(&self, id: &TaskId) -> Option<&TaskInfo> {
        let job = self.task_to_job.get(id)?;
        self.jobs.get(job)?.tasks.get(id)
    }

    pub fn job_of_task(&self, id: &TaskId) -> Option<&JobInfo> {
        self.jobs.get(self.task_to_job.get(id)?)
    }

    pub fn node_list(&self) -> Vec<&NodeInfo> {
        self.nodes.values().collect()
    }

    /// Namespaces that currently have jobs, sorted for determinism.
    pub fn namespaces(&self) -> Vec<String> {
        let mut set: HashSet<&str> = HashSet::new();
        for job in self.jobs.values() {
            set.insert(&job.namespace);
        }
        let mut out: Vec<String> = set.into_iter().map(String::from).collect();
        out.sort();
        out
    }

    /// Every task currently placed on `node`, in a stable order.
    pub fn tasks_on_node(&self, node: &str) -> Vec<TaskId> {
        let Some(node) = self.nodes.get(node) else {
            return Vec::new();
        };
        let mut ids: Vec<TaskId> = node.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn record_fit_errors(&mut self, job: &JobId, task: &TaskId, errors: FitErrors) {
        if let Some(job) = self.jobs.get_mut(job) {
            let message = errors.rollup();
            self.ports.recorder.record(
                task.as_str(),
                EventType::Warning,
                "FailedScheduling",
                &message,
            );
            job.nodes_fit_errors.insert(task.clone(), errors);
        }
    }

    pub fn record_event(&self, object: &str, event_type: EventType, reason: &str, message: &str) {
        self.ports.recorder.record(object, event_type, reason, message);
    }

    // ---- statement mutation primitives ---------------------------------------

    fn task_context(&self, task_id: &TaskId) -> Result<(JobId, QueueId, Resource, TaskStatus)> {
        let job_id = self
            .task_to_job
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedError::TaskNotFound(task_id.to_string()))?;
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;
        let task = job
            .tasks
            .get(task_id)
            .ok_or_else(|| SchedError::TaskNotFound(task_id.to_string()))?;
        Ok((job_id, job.queue.clone(), task.resreq.clone(), task.status))
    }

    fn refresh_job_lca(&mut self, job_id: &JobId) {
        if self.hypernodes.is_empty() {
            return;
        }
        let Some(job) = self.jobs.get(job_id) else {
            return;
        };
        let placed: Vec<&str> = job
            .tasks
            .values()
            .filter(|t| t.status.is_occupied() || t.status == TaskStatus::Pipelined)
            .filter_map(|t| t.node_name.as_deref())
            .collect();
        let lca = self.hypernodes.find_lca_of_nodes(placed);
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.lca_hyper_node = lca;
        }
    }

    pub(crate) fn apply_allocate(&mut self, task_id: &TaskId, node_name: &str) -> Result<()> {
        let (job_id, queue, resreq, status) = self.task_context(task_id)?;
        if status != TaskStatus::Pending {
            return Err(SchedError::InvalidStateTransition {
                from: format!("{status:?}"),
                to: "Allocated".to_string(),
            });
        }
        let node = self
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| SchedError::NodeNotFound(node_name.to_string()))?;
        node.add_task(task_id, &job_id, &resreq, TaskStatus::Allocated)?;
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.update_task_status(task_id, TaskStatus::Allocated);
            if let Some(task) = job.tasks.get_mut(task_id) {
                task.node_name = Some(node_name.to_string());
            }
        }
        self.refresh_job_lca(&job_id);
        debug!(task = %task_id, node = %node_name, "allocated");
        self.fire_allocate(&Event {
            task: task_id.clone(),
            job: job_id,
            queue,
            resreq,
        });
        Ok(())
    }

    pub(crate) fn undo_allocate(&mut self, task_id: &TaskId, node_name: &str) -> Result<()> {
        let (job_id, queue, resreq, _) = self.task_context(task_id)?;
        if let Some(node) = self.nodes.get_mut(node_name) {
            node.remove_task(task_id, &resreq, TaskStatus::Allocated)?;
        }
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.update_task_status(task_id, TaskStatus::Pending);
            if let Some(task) = job.tasks.get_mut(task_id) {
                task.node_name = None;
            }
        }
        self.refresh_job_lca(&job_id);
        self.fire_deallocate(&Event {
            task: task_id.clone(),
            job: job_id,
            queue,
            resreq,
        });
        Ok(())
    }

    pub(crate) fn apply_pipeline(&mut self, task_id: &TaskId, node_name: &str) -> Result<()> {
        let (job_id, queue, resreq, status) = self.task_context(task_id)?;
        if status != TaskStatus::Pending {
            return Err(SchedError::InvalidStateTransition {
                from: format!("{status:?}"),
                to: "Pipelined".to_string(),
            });
        }
        let node = self
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| SchedError::NodeNotFound(node_name.to_string()))?;
        node.add_task(task_id, &job_id, &resreq, TaskStatus::Pipelined)?;
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.update_task_status(task_id, TaskStatus::Pipelined);
            if let Some(task) = job.tasks.get_mut(task_id) {
                task.node_name = Some(node_name.to_string());
            }
        }
        self.refresh_job_lca(&job_id);
        debug!(task = %task_id, node = %node_name, "pipelined");
        self.fire_allocate(&Event {
            task: task_id.clone(),
            job: job_id,
            queue,
            resreq,
        });
        Ok(())
    }

    pub(crate) fn undo_pipeline(&mut self, task_id: &TaskId, node_name: &str) -> Result<()> {
        let (job_id, queue, resreq, _) = self.task_context(task_id)?;
        if let Some(node) = self.nodes.get_mut(node_name) {
            node.remove_task(task_id, &resreq, TaskStatus::Pipelined)?;
        }
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.update_task_status(task_id, TaskStatus::Pending);
            if let Some(task) = job.tasks.get_mut(task_id) {
                task.node_name = None;
            }
        }
        self.refresh_job_lca(&job_id);
        self.fire_deallocate(&Event {
            task: task_id.clone(),
            job: job_id,
            queue,
            resreq,
        });
        Ok(())
    }

    /// Flip an occupied task into Releasing; its capacity becomes part of
    /// the node's future idle.
    pub(crate) fn apply_evict(&mut self, task_id: &TaskId) -> Result<TaskStatus> {
        let (job_id, queue, resreq, status) = self.task_context(task_id)?;
        if !status.is_occupied() {
            return Err(SchedError::InvalidStateTransition {
                from: format!("{status:?}"),
                to: "Releasing".to_string(),
            });
        }
        let node_name = self
            .task(task_id)
            .and_then(|t| t.node_name.clone())
            .ok_or_else(|| SchedError::TaskNotFound(task_id.to_string()))?;
        if let Some(node) = self.nodes.get_mut(&node_name) {
            node.mark_releasing(&resreq);
        }
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.update_task_status(task_id, TaskStatus::Releasing);
        }
        debug!(task = %task_id, node = %node_name, "marked releasing");
        self.fire_deallocate(&Event {
            task: task_id.clone(),
            job: job_id,
            queue,
            resreq,
        });
        Ok(status)
    }

    pub(crate) fn undo_evict(&mut self, task_id: &TaskId, prev_status: TaskStatus) -> Result<()> {
        let (job_id, queue, resreq, _) = self.task_context(task_id)?;
        let node_name = self.task(task_id).and_then(|t| t.node_name.clone());
        if let Some(node_name) = node_name {
            if let Some(node) = self.nodes.get_mut(&node_name) {
                node.unmark_releasing(&resreq)?;
            }
        }
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.update_task_status(task_id, prev_status);
        }
        self.fire_allocate(&Event {
            task: task_id.clone(),
            job: job_id,
            queue,
            resreq,
        });
        Ok(())
    }

    pub(crate) async fn dispatch_bind(
        &self,
        task_id: &TaskId,
        node_name: &str,
        volumes: Option<&gangway_core::PodVolumes>,
    ) {
        let Some(task) = self.task(task_id) else {
            return;
        };
        if let Err(err) = self.ports.binder.bind(task, node_name, volumes).await {
            warn!(task = %task_id, node = %node_name, %err, "bind dispatch failed; will retry next cycle");
        }
    }

    pub(crate) async fn dispatch_evict(&self, task_id: &TaskId, reason: &str) {
        let Some(task) = self.task(task_id) else {
            return;
        };
        if let Err(err) = self.ports.evictor.evict(task, reason).await {
            warn!(task = %task_id, %err, "evict dispatch failed; will retry next cycle");
        }
    }

    fn fire_allocate(&self, event: &Event) {
        for handler in &self.event_handlers {
            if let Some(f) = &handler.allocate {
                f(event);
            }
        }
    }

    fn fire_deallocate(&self, event: &Event) {
        for handler in &self.event_handlers {
            if let Some(f) = &handler.deallocate {
                f(event);
            }
        }
    }
}
