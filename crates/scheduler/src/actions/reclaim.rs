//! Reclaim action: pull capacity back from queues above their deserved
//! share
//!
//! For every under-served queue with waiting work, victims are drawn from
//! other queues that sit above their deserved share, filtered through the
//! reclaimable intersection, and evicted until the waiting task fits. A
//! statement commits only when the freed capacity actually places the
//! task.

use std::cmp::Ordering;

use async_trait::async_trait;
use tracing::{debug, info};

use gangway_core::{DimensionSet, JobId, PreemptPolicy, QueueId, Result, TaskId};

use crate::framework::{Session, Statement};
use crate::util;

use super::Action;

pub struct Reclaim;

#[async_trait]
impl Action for Reclaim {
    fn name(&self) -> &str {
        "reclaim"
    }

    async fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter reclaim");

        let mut queues: Vec<QueueId> = ssn.queues.keys().cloned().collect();
        let mut total_evictions = 0usize;

        while let Some(queue_id) = util::pop_min_by(&mut queues, |l, r| {
            match (ssn.queues.get(l), ssn.queues.get(r)) {
                (Some(l), Some(r)) => ssn.queue_order(l, r),
                _ => Ordering::Equal,
            }
        }) {
            // an overused queue has nothing to claim back
            let overused = ssn
                .queues
                .get(&queue_id)
                .map(|q| ssn.overused(q))
                .unwrap_or(true);
            if overused {
                continue;
            }

            let mut job_ids: Vec<JobId> = ssn
                .jobs
                .values()
                .filter(|job| job.queue == queue_id)
                .filter(|job| job.pod_group.phase != gangway_core::PodGroupPhase::Pending)
                .filter(|job| job.count_in(gangway_core::TaskStatus::Pending) > 0)
                .map(|job| job.uid.clone())
                .collect();

            while let Some(job_id) = util::pop_min_by(&mut job_ids, |l, r| {
                match (ssn.job(l), ssn.job(r)) {
                    (Some(l), Some(r)) => ssn.job_order(l, r),
                    _ => Ordering::Equal,
                }
            }) {
                let task_ids: Vec<TaskId> = ssn
                    .job(&job_id)
                    .map(|job| {
                        job.tasks_in(gangway_core::TaskStatus::Pending)
                            .filter(|t| !t.best_effort)
                            .map(|t| t.uid.clone())
                            .collect()
                    })
                    .unwrap_or_default();

                for task_id in task_ids {
                    total_evictions += reclaim_for_task(ssn, &queue_id, &task_id).await;
                }
            }
        }

        info!(evictions = total_evictions, "reclaim finished");
        Ok(())
    }
}

/// Free enough capacity on one node for `task_id`; returns the number of
/// evictions committed.
async fn reclaim_for_task(ssn: &mut Session, queue_id: &QueueId, task_id: &TaskId) -> usize {
    let Some(task) = ssn.task(task_id).cloned() else {
        return 0;
    };
    // a preempt-never task may not displace anyone
    if task.preempt_policy == PreemptPolicy::Never {
        debug!(task = %task_id, "task carries preempt-never policy, skipping reclaim");
        return 0;
    }
    {
        let Some(queue) = ssn.queues.get(queue_id) else {
            return 0;
        };
        if !ssn.allocatable(queue, &task) {
            debug!(task = %task_id, queue = %queue_id, "queue share would not admit the task anyway");
            return 0;
        }
    }

    let node_names: Vec<String> = ssn.nodes.keys().cloned().collect();
    for node_name in node_names {
        // victims on this node from queues above their deserved share
        let victims = {
            let Some(node) = ssn.node(&node_name) else {
                continue;
            };
            if ssn.predicate(&task, node).is_err() {
                continue;
            }
            let mut reclaimees: Vec<TaskId> = Vec::new();
            for uid in ssn.tasks_on_node(&node_name) {
                let Some(candidate) = ssn.task(&uid) else {
                    continue;
                };
                if !candidate.status.is_occupied() || !candidate.preemptable {
                    continue;
                }
                let Some(owner) = ssn.job_of_task(&uid) else {
                    continue;
                };
                if owner.queue == *queue_id {
                    continue;
                }
                let victim_queue_overused = ssn
                    .queues
                    .get(&owner.queue)
                    .map(|q| ssn.overused(q))
                    .unwrap_or(false);
                if victim_queue_overused {
                    reclaimees.push(uid);
                }
            }
            if reclaimees.is_empty() {
                continue;
            }
            let victims = ssn.reclaimable(&task, &reclaimees);
            if victims.is_empty() {
                debug!(task = %task_id, node = %node_name, "no agreed victims on node");
                continue;
            }
            ssn.build_victims_queue(victims, &task)
        };

        let mut stmt = Statement::new();
        for victim in victims {
            let enough = ssn
                .node(&node_name)
                .map(|n| task.init_resreq.less_equal(&n.future_idle(), DimensionSet::Zero))
                .unwrap_or(false);
            if enough {
                break;
            }
            if let Err(err) = stmt.evict(ssn, &victim, "reclaim") {
                tracing::error!(victim = %victim, %err, "failed to evict reclaim victim");
            }
        }

        let enough = ssn
            .node(&node_name)
            .map(|n| task.init_resreq.less_equal(&n.future_idle(), DimensionSet::Zero))
            .unwrap_or(false);
        if enough && !stmt.is_empty() {
            if let Err(err) = stmt.pipeline(ssn, task_id, &node_name) {
                tracing::error!(task = %task_id, %err, "failed to pipeline reclaimer");
                stmt.discard(ssn);
                return 0;
            }
            let evictions = stmt.evictions();
            stmt.commit(ssn).await;
            info!(task = %task_id, node = %node_name, evictions, "reclaimed capacity");
            return evictions;
        }
        stmt.discard(ssn);
    }
    0
}
