//! Preempt action: make room for starving jobs inside their own queue
//!
//! Starving jobs pick pending tasks; for each task, victims on a
//! candidate node are collected through the preemptable intersection,
//! ordered by the composite victim comparator, and evicted until the
//! task fits the node's future idle capacity.

use std::cmp::Ordering;

use async_trait::async_trait;
use tracing::{debug, info};

use gangway_core::{DimensionSet, JobId, PreemptPolicy, QueueId, Result, TaskId};

use crate::framework::{Session, Statement};
use crate::util;

use super::Action;

pub struct Preempt;

#[async_trait]
impl Action for Preempt {
    fn name(&self) -> &str {
        "preempt"
    }

    async fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter preempt");

        let mut queues: Vec<QueueId> = ssn.queues.keys().cloned().collect();
        let mut total_evictions = 0usize;

        while let Some(queue_id) = util::pop_min_by(&mut queues, |l, r| {
            match (ssn.queues.get(l), ssn.queues.get(r)) {
                (Some(l), Some(r)) => ssn.queue_order(l, r),
                _ => Ordering::Equal,
            }
        }) {
            let mut starving: Vec<JobId> = ssn
                .jobs
                .values()
                .filter(|job| job.queue == queue_id)
                .filter(|job| job.pod_group.phase != gangway_core::PodGroupPhase::Pending)
                .filter(|job| ssn.job_valid(job).is_none())
                .filter(|job| ssn.job_starving(job))
                .map(|job| job.uid.clone())
                .collect();

            while let Some(job_id) = util::pop_min_by(&mut starving, |l, r| {
                match (ssn.job(l), ssn.job(r)) {
                    (Some(l), Some(r)) => ssn.job_order(l, r),
                    _ => Ordering::Equal,
                }
            }) {
                total_evictions += preempt_for_job(ssn, &queue_id, &job_id).await;
            }
        }

        info!(evictions = total_evictions, "preempt finished");
        Ok(())
    }
}

async fn preempt_for_job(ssn: &mut Session, queue_id: &QueueId, job_id: &JobId) -> usize {
    let task_ids: Vec<TaskId> = {
        let Some(job) = ssn.job(job_id) else {
            return 0;
        };
        let mut pq = util::PriorityQueue::new(|l: &TaskId, r: &TaskId| {
            match (ssn.task(l), ssn.task(r)) {
                (Some(l), Some(r)) => ssn.task_order(l, r),
                _ => Ordering::Equal,
            }
        });
        for task in job.tasks_in(gangway_core::TaskStatus::Pending) {
            if !task.best_effort {
                pq.push(task.uid.clone());
            }
        }
        pq.into_sorted_vec()
    };

    let mut evictions = 0usize;
    for task_id in task_ids {
        // once the gang stops starving, leave the rest for allocate
        let still_starving = ssn
            .job(job_id)
            .map(|j| ssn.job_starving(j))
            .unwrap_or(false);
        if !still_starving {
            break;
        }
        evictions += preempt_for_task(ssn, queue_id, &task_id).await;
    }
    evictions
}

/// Evict lower-priority tasks on one node until `task_id` fits there.
async fn preempt_for_task(ssn: &mut Session, queue_id: &QueueId, task_id: &TaskId) -> usize {
    let Some(preemptor) = ssn.task(task_id).cloned() else {
        return 0;
    };
    if preemptor.preempt_policy == PreemptPolicy::Never {
        debug!(task = %task_id, "preemptor carries preempt-never policy");
        return 0;
    }
    {
        let Some(queue) = ssn.queues.get(queue_id) else {
            return 0;
        };
        if !ssn.preemptive(queue, &preemptor) {
            debug!(queue = %queue_id, "queue may not preempt right now");
            return 0;
        }
    }

    let node_names: Vec<String> = ssn.nodes.keys().cloned().collect();
    for node_name in node_names {
        let victims = {
            let Some(node) = ssn.node(&node_name) else {
                continue;
            };
            if ssn.predicate(&preemptor, node).is_err() {
                continue;
            }
            // intra-queue preemption: victims share the preemptor's queue
            let mut preemptees: Vec<TaskId> = Vec::new();
            for uid in ssn.tasks_on_node(&node_name) {
                let Some(candidate) = ssn.task(&uid) else {
                    continue;
                };
                if !candidate.status.is_occupied()
                    || !candidate.preemptable
                    || candidate.job == preemptor.job
                {
                    continue;
                }
                let Some(owner) = ssn.job_of_task(&uid) else {
                    continue;
                };
                if owner.queue == *queue_id {
                    preemptees.push(uid);
                }
            }
            if preemptees.is_empty() {
                continue;
            }
            let victims = ssn.preemptable(&preemptor, &preemptees);
            if victims.is_empty() {
                debug!(task = %task_id, node = %node_name, "no preemptable victims on node");
                continue;
            }
            ssn.build_victims_queue(victims, &preemptor)
        };

        let mut stmt = Statement::new();
        for victim in victims {
            let enough = ssn
                .node(&node_name)
                .map(|n| {
                    preemptor
                        .init_resreq
                        .less_equal(&n.future_idle(), DimensionSet::Zero)
                })
                .unwrap_or(false);
            if enough {
                break;
            }
            debug!(victim = %victim, preemptor = %task_id, "evicting for preemption");
            if let Err(err) = stmt.evict(ssn, &victim, "preempt") {
                tracing::error!(victim = %victim, %err, "failed to evict victim");
            }
        }

        let enough = ssn
            .node(&node_name)
            .map(|n| {
                preemptor
                    .init_resreq
                    .less_equal(&n.future_idle(), DimensionSet::Zero)
            })
            .unwrap_or(false);
        if enough && !stmt.is_empty() {
            if let Err(err) = stmt.pipeline(ssn, task_id, &node_name) {
                tracing::error!(task = %task_id, %err, "failed to pipeline preemptor");
                stmt.discard(ssn);
                return 0;
            }
            let evictions = stmt.evictions();
            stmt.commit(ssn).await;
            info!(task = %task_id, node = %node_name, evictions, "preempted for task");
            return evictions;
        }
        stmt.discard(ssn);
    }
    0
}
