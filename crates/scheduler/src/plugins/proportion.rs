//! Proportion plugin: weighted fair sharing over the queue tree
//!
//! Computes each queue's deserved share by iterative water-filling:
//! every round hands the remaining capacity to unsatisfied queues in
//! weight proportion, clamped by real capability and request and floored
//! by guarantee, until requests are met or nothing moves. The deserved
//! share then backs the overused/allocatable/reclaimable/enqueueable
//! gates and the queue ordering.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use gangway_core::{
    DimensionSet, MissingDimension, QueueId, Resource, TaskId,
};
use gangway_ports::EventType;

use crate::framework::{Arguments, EventHandler, Plugin, Session, Vote};

pub const PLUGIN_NAME: &str = "proportion";

pub fn new(_arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(ProportionPlugin {
        state: Arc::new(Mutex::new(State::default())),
    })
}

#[derive(Debug, Default)]
struct QueueAttr {
    name: String,
    weight: u32,
    share: f64,
    deserved: Resource,
    allocated: Resource,
    request: Resource,
    /// Allocation above the jobs' declared floors; reclaimable without
    /// gang damage.
    elastic: Resource,
    /// Min-resources reserved by enqueued-but-unscheduled jobs.
    inqueue: Resource,
    real_capability: Resource,
    guarantee: Resource,
    children: HashSet<QueueId>,
    parent: Option<QueueId>,
}

#[derive(Debug, Default)]
struct State {
    total_resource: Resource,
    total_guarantee: Resource,
    queue_attrs: HashMap<QueueId, QueueAttr>,
}

impl State {
    fn is_leaf(&self, queue: &QueueId) -> bool {
        self.queue_attrs
            .get(queue)
            .map(|attr| attr.children.is_empty())
            .unwrap_or(true)
    }

    fn parent_of(&self, queue: &QueueId) -> Option<QueueId> {
        self.queue_attrs.get(queue)?.parent.clone()
    }

    fn level_of(&self, queue: &QueueId) -> usize {
        let mut level = 0;
        let mut current = queue.clone();
        while let Some(parent) = self.parent_of(&current) {
            level += 1;
            current = parent;
        }
        level
    }

    /// The ancestor of `queue` sitting one level below `lca`.
    fn frontier_below(&self, queue: &QueueId, lca: Option<&QueueId>) -> QueueId {
        let mut current = queue.clone();
        loop {
            let parent = self.parent_of(&current);
            if parent.as_ref() == lca {
                return current;
            }
            match parent {
                Some(p) => current = p,
                None => return current,
            }
        }
    }

    fn lowest_common_ancestor(&self, a: &QueueId, b: &QueueId) -> Option<QueueId> {
        let mut la = self.level_of(a);
        let mut lb = self.level_of(b);
        let mut qa = a.clone();
        let mut qb = b.clone();
        while la > lb {
            qa = self.parent_of(&qa)?;
            la -= 1;
        }
        while lb > la {
            qb = self.parent_of(&qb)?;
            lb -= 1;
        }
        while qa != qb {
            qa = self.parent_of(&qa)?;
            qb = self.parent_of(&qb)?;
        }
        Some(qa)
    }

    fn update_share(&mut self, queue: &QueueId) {
        if let Some(attr) = self.queue_attrs.get_mut(queue) {
            attr.share = Resource::share_of(&attr.allocated, &attr.deserved);
        }
    }

    /// Parent stats are aggregates of children; recompute up to the root.
    fn update_parents(&mut self, queue: &QueueId) {
        let mut current = self.parent_of(queue);
        while let Some(parent_id) = current {
            let children: Vec<QueueId> = match self.queue_attrs.get(&parent_id) {
                Some(attr) => attr.children.iter().cloned().collect(),
                None => break,
            };
            let mut allocated = Resource::empty();
            let mut request = Resource::empty();
            let mut guarantee = Resource::empty();
            for child in &children {
                if let Some(child_attr) = self.queue_attrs.get(child) {
                    allocated.add(&child_attr.allocated);
                    request.add(&child_attr.request);
                    guarantee.add(&child_attr.guarantee);
                }
            }
            if let Some(attr) = self.queue_attrs.get_mut(&parent_id) {
                attr.allocated = allocated;
                attr.request = request;
                attr.guarantee = guarantee;
            }
            self.update_share(&parent_id);
            current = self.parent_of(&parent_id);
        }
    }

    /// Compare two queues by weight (descending) then share (ascending).
    fn cmp_weight_share(&self, l: &QueueId, r: &QueueId) -> Ordering {
        let (Some(la), Some(ra)) = (self.queue_attrs.get(l), self.queue_attrs.get(r)) else {
            return Ordering::Equal;
        };
        ra.weight
            .cmp(&la.weight)
            .then_with(|| la.share.partial_cmp(&ra.share).unwrap_or(Ordering::Equal))
    }
}

struct ProportionPlugin {
    state: Arc<Mutex<State>>,
}

fn build_queue_attrs(state: &mut State, ssn: &Session) {
    state.total_resource = ssn.total_resource.clone();
    for queue in ssn.queues.values() {
        state.total_guarantee.add(&queue.guarantee);
    }

    for queue in ssn.queues.values() {
        let mut real_capability = state.total_resource.clone();
        let _ = real_capability.sub(&state.total_guarantee);
        real_capability.add(&queue.guarantee);
        if let Some(capability) = &queue.capability {
            real_capability = Resource::min(&real_capability, capability);
        }
        state.queue_attrs.insert(
            queue.uid.clone(),
            QueueAttr {
                name: queue.name.clone(),
                weight: queue.weight,
                real_capability,
                guarantee: queue.guarantee.clone(),
                parent: queue.parent.clone(),
                ..Default::default()
            },
        );
    }
    // resolve child links after every attr exists
    let links: Vec<(QueueId, QueueId)> = ssn
        .queues
        .values()
        .filter_map(|q| q.parent.clone().map(|p| (p, q.uid.clone())))
        .collect();
    for (parent, child) in links {
        if let Some(attr) = state.queue_attrs.get_mut(&parent) {
            attr.children.insert(child);
        }
    }

    for job in ssn.jobs.values() {
        let Some(attr) = state.queue_attrs.get_mut(&job.queue) else {
            debug!(job = %job.uid, queue = %job.queue, "job references an unknown queue");
            continue;
        };
        for task in job.tasks.values() {
            if task.status.is_occupied() {
                attr.allocated.add(&task.resreq);
                attr.request.add(&task.resreq);
            } else if task.status == gangway_core::TaskStatus::Pending {
                attr.request.add(&task.resreq);
            }
        }
        if job.pod_group.phase == gangway_core::PodGroupPhase::Inqueue {
            attr.inqueue.add(&job.min_resources());
        }
        // a running job's unallocated floor stays reserved
        if job.pod_group.phase == gangway_core::PodGroupPhase::Running
            && job.pod_group.min_resources.is_some()
            && job.ready_task_num() >= job.min_available
        {
            let (still_due, _) = job.min_resources().diff(&job.allocated(), DimensionSet::All);
            attr.inqueue.add(&still_due);
        }
        attr.elastic.add(&job.elastic_resources());
    }
}

/// One full water-filling pass over the leaf queues.
fn water_fill(state: &mut State) {
    let leaves: Vec<QueueId> = state
        .queue_attrs
        .keys()
        .filter(|id| state.is_leaf(id))
        .cloned()
        .collect();

    let mut remaining = state.total_resource.clone();
    let mut met: HashSet<QueueId> = HashSet::new();
    loop {
        let total_weight: u32 = leaves
            .iter()
            .filter(|id| !met.contains(*id))
            .filter_map(|id| state.queue_attrs.get(id))
            .map(|attr| attr.weight)
            .sum();
        if total_weight == 0 {
            break;
        }

        let old_remaining = remaining.clone();
        let mut increased_total = Resource::empty();
        let mut decreased_total = Resource::empty();
        for id in &leaves {
            if met.contains(id) {
                continue;
            }
            let Some(attr) = state.queue_attrs.get_mut(id) else {
                continue;
            };
            let old_deserved = attr.deserved.clone();
            attr.deserved
                .add(&remaining.scaled(attr.weight as f64 / total_weight as f64));
            attr.deserved
                .min_dimension_resource(&attr.real_capability.clone(), MissingDimension::Infinity);
            attr.deserved
                .min_dimension_resource(&attr.request.clone(), MissingDimension::Zero);
            attr.deserved = Resource::max(&attr.deserved, &attr.guarantee);

            if attr.request.less_equal(&attr.deserved, DimensionSet::Zero)
                || attr.deserved == old_deserved
            {
                met.insert(id.clone());
            }
            let (increased, decreased) = attr.deserved.diff(&old_deserved, DimensionSet::Zero);
            increased_total.add(&increased);
            decreased_total.add(&decreased);

            state.update_share(id);
            state.update_parents(id);
        }

        let _ = remaining.sub(&increased_total);
        remaining.add(&decreased_total);
        if remaining.is_empty() || remaining == old_remaining {
            break;
        }
    }

    for id in &leaves {
        if let Some(attr) = state.queue_attrs.get(id) {
            debug!(
                queue = %attr.name,
                deserved = %attr.deserved,
                allocated = %attr.allocated,
                request = %attr.request,
                "deserved share settled"
            );
        }
    }
}

impl Plugin for ProportionPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        {
            let mut state = self.state.lock();
            build_queue_attrs(&mut state, ssn);
            water_fill(&mut state);
        }

        let state = Arc::clone(&self.state);
        ssn.add_queue_order_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, l, r| {
                let state = state.lock();
                let l_leaf = state.is_leaf(&l.uid);
                let r_leaf = state.is_leaf(&r.uid);
                // non-leaf queues always sort last
                match (l_leaf, r_leaf) {
                    (true, false) => return Ordering::Less,
                    (false, true) => return Ordering::Greater,
                    (false, false) => return state.cmp_weight_share(&l.uid, &r.uid),
                    (true, true) => {}
                }
                let l_parent = state.parent_of(&l.uid);
                let r_parent = state.parent_of(&r.uid);
                if l_parent == r_parent {
                    return state.cmp_weight_share(&l.uid, &r.uid);
                }
                // compare the ancestors just below the lowest common one
                let lca = state.lowest_common_ancestor(&l.uid, &r.uid);
                let l_frontier = state.frontier_below(&l.uid, lca.as_ref());
                let r_frontier = state.frontier_below(&r.uid, lca.as_ref());
                state.cmp_weight_share(&l_frontier, &r_frontier)
            }),
        );

        // lower-priority queues bleed first when victims span queues
        ssn.add_victim_queue_order_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, l, r, _preemptor| l.priority.cmp(&r.priority)),
        );

        let state = Arc::clone(&self.state);
        ssn.add_reclaimable_fn(
            PLUGIN_NAME,
            Box::new(move |ssn, reclaimer, reclaimees| {
                let state = state.lock();
                let mut victims: Vec<TaskId> = Vec::new();
                let mut allocations: HashMap<QueueId, Resource> = HashMap::new();
                for uid in reclaimees {
                    let Some(task) = ssn.task(uid) else {
                        continue;
                    };
                    let Some(job) = ssn.job(&task.job) else {
                        continue;
                    };
                    let Some(attr) = state.queue_attrs.get(&job.queue) else {
                        continue;
                    };
                    let allocated = allocations
                        .entry(job.queue.clone())
                        .or_insert_with(|| attr.allocated.clone());
                    if allocated.less_partly(&reclaimer.resreq, DimensionSet::Zero) {
                        debug!(queue = %job.queue, "queue cannot free enough for the reclaimer");
                        continue;
                    }
                    if !allocated.less_equal(&attr.deserved, DimensionSet::Zero) {
                        let _ = allocated.sub(&task.resreq);
                        victims.push(uid.clone());
                    }
                }
                Some(victims)
            }),
        );

        let state = Arc::clone(&self.state);
        ssn.add_overused_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, queue| {
                let state = state.lock();
                let Some(attr) = state.queue_attrs.get(&queue.uid) else {
                    return false;
                };
                attr.deserved
                    .less_equal(&attr.allocated, DimensionSet::Zero)
            }),
        );

        let state = Arc::clone(&self.state);
        ssn.add_allocatable_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, queue, candidate| {
                let state = state.lock();
                if !state.is_leaf(&queue.uid) {
                    return false;
                }
                let Some(attr) = state.queue_attrs.get(&queue.uid) else {
                    return false;
                };
                let (free, _) = attr.deserved.diff(&attr.allocated, DimensionSet::Zero);
                let allocatable = candidate.resreq.less_equal(&free, DimensionSet::Zero);
                if !allocatable {
                    debug!(
                        queue = %queue.name,
                        deserved = %attr.deserved,
                        allocated = %attr.allocated,
                        request = %candidate.resreq,
                        "queue share exhausted"
                    );
                }
                allocatable
            }),
        );

        let state = Arc::clone(&self.state);
        ssn.add_job_enqueueable_fn(
            PLUGIN_NAME,
            Box::new(move |ssn, job| {
                let state = state.lock();
                let Some(attr) = state.queue_attrs.get(&job.queue) else {
                    return Vote::Abstain;
                };
                if job.pod_group.min_resources.is_none() {
                    return Vote::Permit;
                }
                // queue quota: minReq + allocated + inqueue − elastic must fit
                let mut needed = job.min_resources();
                needed.add(&attr.allocated);
                needed.add(&attr.inqueue);
                let (needed, _) = needed.diff(&attr.elastic, DimensionSet::All);
                if needed.less_equal(&attr.real_capability, DimensionSet::Infinity) {
                    Vote::Permit
                } else {
                    ssn.record_event(
                        job.uid.as_str(),
                        EventType::Normal,
                        "Unschedulable",
                        "queue resource quota insufficient",
                    );
                    Vote::Reject
                }
            }),
        );

        let state = Arc::clone(&self.state);
        ssn.add_job_enqueued_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, job| {
                let mut state = state.lock();
                let min = job.min_resources();
                if let Some(attr) = state.queue_attrs.get_mut(&job.queue) {
                    attr.inqueue.add(&min);
                }
            }),
        );

        let alloc_state = Arc::clone(&self.state);
        let dealloc_state = Arc::clone(&self.state);
        ssn.add_event_handler(EventHandler {
            allocate: Some(Box::new(move |event| {
                let mut state = alloc_state.lock();
                if let Some(attr) = state.queue_attrs.get_mut(&event.queue) {
                    attr.allocated.add(&event.resreq);
                }
                state.update_share(&event.queue);
                state.update_parents(&event.queue);
            })),
            deallocate: Some(Box::new(move |event| {
                let mut state = dealloc_state.lock();
                if let Some(attr) = state.queue_attrs.get_mut(&event.queue) {
                    let _ = attr.allocated.sub(&event.resreq);
                }
                state.update_share(&event.queue);
                state.update_parents(&event.queue);
            })),
        });
    }

    fn on_session_close(&mut self, _ssn: &mut Session) {
        *self.state.lock() = State::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{PluginSpec, SchedulerConf, SessionPorts, Tier};
    use crate::testing::SnapshotBuilder;

    fn conf() -> SchedulerConf {
        SchedulerConf {
            actions: vec!["allocate".into()],
            tiers: vec![Tier {
                plugins: vec![PluginSpec::new("proportion")],
            }],
        }
    }

    /// 10 cpu total, weights 1 and 3, unbounded demand: deserved lands at
    /// 2.5 and 7.5 cpu.
    #[test]
    fn water_filling_splits_by_weight() {
        let snapshot = SnapshotBuilder::new()
            .queue("q1", 1)
            .queue("q2", 3)
            .node("n1", 10_000.0)
            .job("j1", "q1", 1, &[("a1", 20_000.0)])
            .job("j2", "q2", 1, &[("b1", 20_000.0)])
            .build();

        let mut plugin = ProportionPlugin {
            state: Arc::new(Mutex::new(State::default())),
        };
        let mut ssn = Session::open(snapshot, &conf(), SessionPorts::noop());
        plugin.on_session_open(&mut ssn);

        let state = plugin.state.lock();
        let q1 = &state.queue_attrs[&QueueId::from("q1")];
        let q2 = &state.queue_attrs[&QueueId::from("q2")];
        assert!((q1.deserved.milli_cpu - 2_500.0).abs() < 10.0, "q1 deserved {}", q1.deserved);
        assert!((q2.deserved.milli_cpu - 7_500.0).abs() < 10.0, "q2 deserved {}", q2.deserved);
    }

    /// A queue whose demand is below its fair share only deserves what it
    /// asked; the rest flows to the hungry queue.
    #[test]
    fn water_filling_caps_at_request() {
        let snapshot = SnapshotBuilder::new()
            .queue("small", 1)
            .queue("big", 1)
            .node("n1", 10_000.0)
            .job("j1", "small", 1, &[("a1", 1_000.0)])
            .job("j2", "big", 1, &[("b1", 20_000.0)])
            .build();

        let mut plugin = ProportionPlugin {
            state: Arc::new(Mutex::new(State::default())),
        };
        let mut ssn = Session::open(snapshot, &conf(), SessionPorts::noop());
        plugin.on_session_open(&mut ssn);

        let state = plugin.state.lock();
        let small = &state.queue_attrs[&QueueId::from("small")];
        let big = &state.queue_attrs[&QueueId::from("big")];
        assert!((small.deserved.milli_cpu - 1_000.0).abs() < 10.0);
        assert!(big.deserved.milli_cpu > 8_000.0, "big deserved {}", big.deserved);
    }

    /// Guarantee floors survive even when weight says otherwise.
    #[test]
    fn guarantee_is_a_floor() {
        let guaranteed = gangway_core::QueueInfo::new("gq", 1)
            .with_guarantee(Resource::new(4_000.0, 0.0));
        let snapshot = SnapshotBuilder::new()
            .queue_info(guaranteed)
            .queue("other", 10)
            .node("n1", 10_000.0)
            .job("j1", "gq", 1, &[("a1", 20_000.0)])
            .job("j2", "other", 1, &[("b1", 20_000.0)])
            .build();

        let mut plugin = ProportionPlugin {
            state: Arc::new(Mutex::new(State::default())),
        };
        let mut ssn = Session::open(snapshot, &conf(), SessionPorts::noop());
        plugin.on_session_open(&mut ssn);

        let state = plugin.state.lock();
        let gq = &state.queue_attrs[&QueueId::from("gq")];
        assert!(gq.deserved.milli_cpu >= 4_000.0 - 10.0, "gq deserved {}", gq.deserved);
    }
}
