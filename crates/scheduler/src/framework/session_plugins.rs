//! Delegating callers: how one extension point composes across tiers
//!
//! Composition rules per extension point family:
//! - voting (pipelined/enqueueable): any reject kills it, any permit in a
//!   tier short-circuits the remaining tiers, all-abstain falls through
//! - boolean AND (overused/allocatable/ready): one reject rejects
//! - intersection (preemptable/reclaimable): candidates intersect within
//!   a tier; the first tier that produced a decision wins
//! - compare: first non-zero comparison wins, then creation-time/UID
//! - score: per-plugin scores sum; an erroring scorer contributes nothing
//! - victims: union within a tier; first non-empty tier wins
//!
//! Every plugin call runs behind a panic guard: a panicking plugin is
//! logged and treated as abstaining (scores) or rejecting (gates).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use gangway_core::{
    FitError, JobId, JobInfo, NodeInfo, QueueInfo, TaskId, TaskInfo,
};

use super::config::is_enabled;
use super::session::Session;
use super::{ValidateResult, Vote};
use crate::util;

fn guard<T>(plugin: &str, point: &str, default: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => v,
        Err(_) => {
            error!(plugin, point, "plugin panicked; treating call as no-op");
            default
        }
    }
}

impl Session {
    /// Victims every enabled plugin agrees may be reclaimed.
    pub fn reclaimable(&self, reclaimer: &TaskInfo, reclaimees: &[TaskId]) -> Vec<TaskId> {
        self.evictable(reclaimer, reclaimees, false)
    }

    /// Victims every enabled plugin agrees may be preempted.
    pub fn preemptable(&self, preemptor: &TaskInfo, preemptees: &[TaskId]) -> Vec<TaskId> {
        self.evictable(preemptor, preemptees, true)
    }

    fn evictable(&self, aggressor: &TaskInfo, candidates: &[TaskId], preempt: bool) -> Vec<TaskId> {
        let mut victims: Option<Vec<TaskId>> = None;
        for tier in &self.tiers {
            for spec in &tier.plugins {
                let enabled = if preempt {
                    spec.enabled_preemptable
                } else {
                    spec.enabled_reclaimable
                };
                if !is_enabled(enabled) {
                    continue;
                }
                let fns = if preempt {
                    &self.preemptable_fns
                } else {
                    &self.reclaimable_fns
                };
                let Some(f) = fns.get(&spec.name) else {
                    continue;
                };
                let point = if preempt { "preemptable" } else { "reclaimable" };
                let Some(selected) =
                    guard(&spec.name, point, None, || f(self, aggressor, candidates))
                else {
                    continue; // abstain
                };
                if selected.is_empty() {
                    victims = None;
                    break;
                }
                victims = match victims {
                    None => Some(selected),
                    Some(current) => {
                        let keep: HashSet<&TaskId> = selected.iter().collect();
                        Some(
                            current
                                .into_iter()
                                .filter(|v| keep.contains(v))
                                .collect(),
                        )
                    }
                };
            }
            // plugins in this tier made a decision
            if victims.is_some() {
                return victims.unwrap_or_default();
            }
        }
        victims.unwrap_or_default()
    }

    pub fn overused(&self, queue: &QueueInfo) -> bool {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_overused) {
                    continue;
                }
                let Some(f) = self.overused_fns.get(&spec.name) else {
                    continue;
                };
                if guard(&spec.name, "overused", true, || f(self, queue)) {
                    return true;
                }
            }
        }
        false
    }

    pub fn preemptive(&self, queue: &QueueInfo, candidate: &TaskInfo) -> bool {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enable_preemptive) {
                    continue;
                }
                let Some(f) = self.preemptive_fns.get(&spec.name) else {
                    continue;
                };
                if !guard(&spec.name, "preemptive", false, || f(self, queue, candidate)) {
                    return false;
                }
            }
        }
        true
    }

    pub fn allocatable(&self, queue: &QueueInfo, candidate: &TaskInfo) -> bool {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_allocatable) {
                    continue;
                }
                let Some(f) = self.allocatable_fns.get(&spec.name) else {
                    continue;
                };
                if !guard(&spec.name, "allocatable", false, || {
                    f(self, queue, candidate)
                }) {
                    return false;
                }
            }
        }
        true
    }

    pub fn job_ready(&self, job: &JobInfo) -> bool {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_job_ready) {
                    continue;
                }
                let Some(f) = self.job_ready_fns.get(&spec.name) else {
                    continue;
                };
                if !guard(&spec.name, "job_ready", false, || f(self, job)) {
                    return false;
                }
            }
        }
        true
    }

    pub fn job_pipelined(&self, job: &JobInfo) -> bool {
        self.vote(job, "job_pipelined", |spec| spec.enabled_job_pipelined, |ssn, name, job| {
            ssn.job_pipelined_fns.get(name).map(|f| f(ssn, job))
        })
    }

    pub fn job_enqueueable(&self, job: &JobInfo) -> bool {
        self.vote(job, "job_enqueueable", |spec| spec.enabled_job_enqueued, |ssn, name, job| {
            ssn.job_enqueueable_fns.get(name).map(|f| f(ssn, job))
        })
    }

    fn vote(
        &self,
        job: &JobInfo,
        point: &str,
        flag: impl Fn(&super::config::PluginSpec) -> Option<bool>,
        call: impl Fn(&Session, &str, &JobInfo) -> Option<Vote>,
    ) -> bool {
        let mut has_permit = false;
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(flag(spec)) {
                    continue;
                }
                let Some(vote) = guard(&spec.name, point, Some(Vote::Reject), || {
                    call(self, &spec.name, job)
                }) else {
                    continue;
                };
                match vote {
                    Vote::Reject => return false,
                    Vote::Permit => has_permit = true,
                    Vote::Abstain => {}
                }
            }
            // a permit in this tier decides without consulting lower tiers
            if has_permit {
                return true;
            }
        }
        true
    }

    /// Voting with "all abstained" meaning "not starving".
    pub fn job_starving(&self, job: &JobInfo) -> bool {
        let mut has_found = false;
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_job_starving) {
                    continue;
                }
                let Some(f) = self.job_starving_fns.get(&spec.name) else {
                    continue;
                };
                has_found = true;
                if !guard(&spec.name, "job_starving", false, || f(self, job)) {
                    return false;
                }
            }
            if has_found {
                return true;
            }
        }
        false
    }

    pub fn job_valid(&self, job: &JobInfo) -> Option<ValidateResult> {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                let Some(f) = self.job_valid_fns.get(&spec.name) else {
                    continue;
                };
                if let Some(result) = f(self, job) {
                    if !result.pass {
                        return Some(result);
                    }
                }
            }
        }
        None
    }

    pub fn job_enqueued(&self, job: &JobInfo) {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_job_enqueued) {
                    continue;
                }
                if let Some(f) = self.job_enqueued_fns.get(&spec.name) {
                    f(self, job);
                }
            }
        }
    }

    pub fn target_job(&self, jobs: &[&JobInfo]) -> Option<JobId> {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_target_job) {
                    continue;
                }
                if let Some(f) = self.target_job_fns.get(&spec.name) {
                    return f(self, jobs);
                }
            }
        }
        None
    }

    /// Union of victims within a tier; the first tier that names any wins.
    pub fn victim_tasks(&self, tasks: &[TaskId]) -> Vec<TaskId> {
        let mut victims: Vec<TaskId> = Vec::new();
        let mut seen: HashSet<TaskId> = HashSet::new();
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_victim) {
                    continue;
                }
                let Some(fns) = self.victim_tasks_fns.get(&spec.name) else {
                    continue;
                };
                for f in fns {
                    for victim in guard(&spec.name, "victim_tasks", Vec::new(), || f(self, tasks)) {
                        if seen.insert(victim.clone()) {
                            victims.push(victim);
                        }
                    }
                }
            }
            if !victims.is_empty() {
                return victims;
            }
        }
        victims
    }

    pub fn reserved_nodes(&self) {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_reserved_nodes) {
                    continue;
                }
                if let Some(f) = self.reserved_nodes_fns.get(&spec.name) {
                    f(self);
                }
            }
        }
    }

    // ---- compare functions ---------------------------------------------------

    pub fn job_order(&self, l: &JobInfo, r: &JobInfo) -> Ordering {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_job_order) {
                    continue;
                }
                let Some(f) = self.job_order_fns.get(&spec.name) else {
                    continue;
                };
                let ord = guard(&spec.name, "job_order", Ordering::Equal, || f(self, l, r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        JobInfo::default_cmp(l, r)
    }

    pub fn queue_order(&self, l: &QueueInfo, r: &QueueInfo) -> Ordering {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_queue_order) {
                    continue;
                }
                let Some(f) = self.queue_order_fns.get(&spec.name) else {
                    continue;
                };
                let ord = guard(&spec.name, "queue_order", Ordering::Equal, || f(self, l, r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        QueueInfo::default_cmp(l, r)
    }

    /// Queue order when choosing whose tasks to victimize. A registered
    /// plugin that ties leaves the tie in place; only a session with no
    /// victim ordering at all falls back to the inverse of `queue_order`.
    pub fn victim_queue_order(&self, l: &QueueInfo, r: &QueueInfo, preemptor: &QueueInfo) -> Ordering {
        let mut consulted = false;
        for tier in &self.tiers {
            for spec in &tier.plugins {
                let Some(f) = self.victim_queue_order_fns.get(&spec.name) else {
                    continue;
                };
                consulted = true;
                let ord = guard(&spec.name, "victim_queue_order", Ordering::Equal, || {
                    f(self, l, r, preemptor)
                });
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        if consulted {
            return Ordering::Equal;
        }
        self.queue_order(l, r).reverse()
    }

    pub fn task_order(&self, l: &TaskInfo, r: &TaskInfo) -> Ordering {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_task_order) {
                    continue;
                }
                let Some(f) = self.task_order_fns.get(&spec.name) else {
                    continue;
                };
                let ord = guard(&spec.name, "task_order", Ordering::Equal, || f(self, l, r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        TaskInfo::default_cmp(l, r)
    }

    pub fn namespace_order(&self, l: &str, r: &str) -> Ordering {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_namespace_order) {
                    continue;
                }
                let Some(f) = self.namespace_order_fns.get(&spec.name) else {
                    continue;
                };
                let ord = guard(&spec.name, "namespace_order", Ordering::Equal, || {
                    f(self, l, r)
                });
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        l.cmp(r)
    }

    pub fn cluster_order(&self, l: &str, r: &str) -> Ordering {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_cluster_order) {
                    continue;
                }
                let Some(f) = self.cluster_order_fns.get(&spec.name) else {
                    continue;
                };
                let ord = guard(&spec.name, "cluster_order", Ordering::Equal, || f(self, l, r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        l.cmp(r)
    }

    // ---- predicates and scoring ----------------------------------------------

    pub fn pre_predicate(&self, task: &TaskInfo) -> std::result::Result<(), FitError> {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_predicate) {
                    continue;
                }
                let Some(f) = self.pre_predicate_fns.get(&spec.name) else {
                    continue;
                };
                f(self, task)?;
            }
        }
        Ok(())
    }

    pub fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> std::result::Result<(), FitError> {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_predicate) {
                    continue;
                }
                let Some(f) = self.predicate_fns.get(&spec.name) else {
                    continue;
                };
                let verdict = guard(
                    &spec.name,
                    "predicate",
                    Err(FitError::new(&task.name, &node.name, "plugin panicked")),
                    || f(self, task, node),
                );
                verdict?;
            }
        }
        Ok(())
    }

    /// Total per-node score: node-order plus node-map contributions.
    pub fn node_order(&self, task: &TaskInfo, node: &NodeInfo) -> f64 {
        let mut total = 0.0;
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_node_order) {
                    continue;
                }
                if let Some(f) = self.node_order_fns.get(&spec.name) {
                    match guard(&spec.name, "node_order", Ok(0.0), || f(self, task, node)) {
                        Ok(score) => total += score,
                        Err(err) => {
                            error!(plugin = %spec.name, %err, "node order scorer failed");
                        }
                    }
                }
                if let Some(f) = self.node_map_fns.get(&spec.name) {
                    match guard(&spec.name, "node_map", Ok(0.0), || f(self, task, node)) {
                        Ok(score) => total += score,
                        Err(err) => {
                            error!(plugin = %spec.name, %err, "node map scorer failed");
                        }
                    }
                }
            }
        }
        total
    }

    /// Batch scores summed across plugins, after per-plugin reduce hooks.
    pub fn batch_node_order(&self, task: &TaskInfo, nodes: &[&NodeInfo]) -> HashMap<String, f64> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_node_order) {
                    continue;
                }
                if let Some(f) = self.batch_node_order_fns.get(&spec.name) {
                    match guard(&spec.name, "batch_node_order", Ok(HashMap::new()), || {
                        f(self, task, nodes)
                    }) {
                        Ok(mut scores) => {
                            if let Some(reduce) = self.node_reduce_fns.get(&spec.name) {
                                if let Err(err) = reduce(self, task, &mut scores) {
                                    error!(plugin = %spec.name, %err, "node reduce failed");
                                    continue;
                                }
                            }
                            for (node, score) in scores {
                                *totals.entry(node).or_default() += score;
                            }
                        }
                        Err(err) => {
                            error!(plugin = %spec.name, %err, "batch node order failed");
                        }
                    }
                }
            }
        }
        totals
    }

    /// Full scoring pipeline for one task over its candidate nodes,
    /// parallel per node, plus batch contributions.
    pub fn node_scores(&self, task: &TaskInfo, nodes: &[&NodeInfo]) -> HashMap<String, f64> {
        let mut scores = util::score_nodes(
            task,
            nodes,
            &|task, node| Some(self.node_order(task, node)),
            &self.cancel,
        );
        for (node, score) in self.batch_node_order(task, nodes) {
            *scores.entry(node).or_default() += score;
        }
        scores
    }

    /// The first enabled plugin that names a best node wins.
    pub fn best_node(&self, task: &TaskInfo, scores: &HashMap<String, f64>) -> Option<String> {
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_best_node) {
                    continue;
                }
                let Some(f) = self.best_node_fns.get(&spec.name) else {
                    continue;
                };
                if let Some(node) = f(self, task, scores) {
                    return Some(node);
                }
            }
        }
        None
    }

    /// Hypernode scores summed across enabled plugins.
    pub fn hyper_node_order(&self, job: &JobInfo) -> HashMap<String, f64> {
        let mut totals: HashMap<String, f64> = HashMap::new();
        for tier in &self.tiers {
            for spec in &tier.plugins {
                if !is_enabled(spec.enabled_network_topology) {
                    continue;
                }
                let Some(f) = self.hyper_node_order_fns.get(&spec.name) else {
                    continue;
                };
                match guard(&spec.name, "hyper_node_order", Ok(HashMap::new()), || {
                    f(self, job)
                }) {
                    Ok(scores) => {
                        for (name, score) in scores {
                            *totals.entry(name).or_default() += score;
                        }
                    }
                    Err(err) => {
                        error!(plugin = %spec.name, %err, "hypernode order failed");
                    }
                }
            }
        }
        totals
    }

    /// Sort victims into eviction order: same job by inverse task order,
    /// different queues by victim-queue order, otherwise inverse job
    /// order.
    pub fn build_victims_queue(&self, victims: Vec<TaskId>, preemptor: &TaskInfo) -> Vec<TaskId> {
        let mut queue = util::PriorityQueue::new(|l: &TaskId, r: &TaskId| {
            let (Some(lt), Some(rt)) = (self.task(l), self.task(r)) else {
                return Ordering::Equal;
            };
            if lt.job == rt.job {
                return self.task_order(lt, rt).reverse();
            }
            let lj = self.jobs.get(&lt.job);
            let rj = self.jobs.get(&rt.job);
            let pj = self.jobs.get(&preemptor.job);
            if let (Some(lj), Some(rj), Some(pj)) = (lj, rj, pj) {
                if lj.queue != rj.queue {
                    if let (Some(lq), Some(rq), Some(pq)) = (
                        self.queues.get(&lj.queue),
                        self.queues.get(&rj.queue),
                        self.queues.get(&pj.queue),
                    ) {
                        let ord = self.victim_queue_order(lq, rq, pq);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                }
                return self.job_order(lj, rj).reverse();
            }
            Ordering::Equal
        });
        for victim in victims {
            queue.push(victim);
        }
        queue.into_sorted_vec()
    }
}
