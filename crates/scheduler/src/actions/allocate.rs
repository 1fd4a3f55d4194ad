//! Allocate action: place pending tasks onto nodes
//!
//! Selection walks namespace -> queue -> job -> task, each level ordered
//! by the session's composed comparators. Overused queues are excluded,
//! tasks fit against future idle capacity, and a job's statement commits
//! only once the gang is ready or at least pipelined.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tracing::{debug, info};

use gangway_core::{DimensionSet, FitError, JobId, QueueId, Result, TaskId};

use crate::framework::{Session, Statement};
use crate::util;

use super::Action;

pub struct Allocate;

#[async_trait]
impl Action for Allocate {
    fn name(&self) -> &str {
        "allocate"
    }

    async fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter allocate");

        // namespace -> queue -> jobs with work
        let mut jobs_map: HashMap<String, HashMap<QueueId, Vec<JobId>>> = HashMap::new();
        for job in ssn.jobs.values() {
            if job.pod_group.phase == gangway_core::PodGroupPhase::Pending {
                continue;
            }
            if let Some(result) = ssn.job_valid(job) {
                debug!(job = %job.uid, reason = %result.reason, "job skipped by validation");
                ssn.record_event(
                    job.uid.as_str(),
                    gangway_ports::EventType::Warning,
                    &result.reason,
                    &result.message,
                );
                continue;
            }
            if !ssn.queues.contains_key(&job.queue) {
                tracing::warn!(job = %job.uid, queue = %job.queue, "queue not found, skipping job");
                continue;
            }
            jobs_map
                .entry(job.namespace.clone())
                .or_default()
                .entry(job.queue.clone())
                .or_default()
                .push(job.uid.clone());
        }

        info!(namespaces = jobs_map.len(), "allocating over namespaces");

        let mut namespaces: Vec<String> = jobs_map.keys().cloned().collect();
        let mut pending_tasks: HashMap<JobId, VecDeque<TaskId>> = HashMap::new();

        while let Some(namespace) =
            util::pop_min_by(&mut namespaces, |l, r| ssn.namespace_order(l, r))
        {
            let Some(queue_map) = jobs_map.get_mut(&namespace) else {
                continue;
            };

            // pick the best non-overused queue of this namespace
            let mut best_queue: Option<QueueId> = None;
            for queue_id in queue_map.keys().cloned().collect::<Vec<_>>() {
                let Some(queue) = ssn.queues.get(&queue_id) else {
                    queue_map.remove(&queue_id);
                    continue;
                };
                if ssn.overused(queue) {
                    debug!(queue = %queue.name, "queue overused, excluded this cycle");
                    queue_map.remove(&queue_id);
                    continue;
                }
                best_queue = match best_queue {
                    None => Some(queue_id),
                    Some(current) => {
                        let cur = &ssn.queues[&current];
                        if ssn.queue_order(queue, cur) == std::cmp::Ordering::Less {
                            Some(queue_id)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
            let Some(queue_id) = best_queue else {
                debug!(namespace, "namespace has no eligible queue");
                continue;
            };

            let Some(jobs) = jobs_map
                .get_mut(&namespace)
                .and_then(|m| m.get_mut(&queue_id))
            else {
                namespaces.push(namespace);
                continue;
            };
            if jobs.is_empty() {
                jobs_map.get_mut(&namespace).map(|m| m.remove(&queue_id));
                namespaces.push(namespace);
                continue;
            }

            let Some(job_id) = util::pop_min_by(jobs, |l, r| {
                match (ssn.job(l), ssn.job(r)) {
                    (Some(l), Some(r)) => ssn.job_order(l, r),
                    _ => std::cmp::Ordering::Equal,
                }
            }) else {
                namespaces.push(namespace);
                continue;
            };

            let tasks = pending_tasks.entry(job_id.clone()).or_insert_with(|| {
                let Some(job) = ssn.jobs.get(&job_id) else {
                    return VecDeque::new();
                };
                let mut queue = util::PriorityQueue::new(|l: &TaskId, r: &TaskId| {
                    match (ssn.task(l), ssn.task(r)) {
                        (Some(l), Some(r)) => ssn.task_order(l, r),
                        _ => std::cmp::Ordering::Equal,
                    }
                });
                for task in job.tasks_in(gangway_core::TaskStatus::Pending) {
                    // BestEffort tasks wait for backfill
                    if task.best_effort {
                        continue;
                    }
                    queue.push(task.uid.clone());
                }
                queue.into_sorted_vec().into()
            });
            let mut tasks: VecDeque<TaskId> = std::mem::take(tasks);

            debug!(job = %job_id, tasks = tasks.len(), "allocating tasks of job");
            let mut stmt = Statement::new();

            while let Some(task_id) = tasks.pop_front() {
                let placement = place_task(ssn, &job_id, &task_id);
                match placement {
                    Placement::Allocate(node) => {
                        if let Err(err) = stmt.allocate(ssn, &task_id, &node, None) {
                            tracing::error!(task = %task_id, node = %node, %err, "failed to allocate task");
                        }
                    }
                    Placement::Pipeline(node) => {
                        if let Err(err) = stmt.pipeline(ssn, &task_id, &node) {
                            tracing::error!(task = %task_id, node = %node, %err, "failed to pipeline task");
                        }
                    }
                    Placement::Skip => continue,
                    Placement::GiveUp => break,
                }

                // fair interleaving: once the gang is satisfied, hand the
                // queue position back and let siblings make progress
                let ready = ssn.job(&job_id).map(|j| ssn.job_ready(j)).unwrap_or(false);
                if ready && !tasks.is_empty() {
                    if let Some(jobs) = jobs_map
                        .get_mut(&namespace)
                        .and_then(|m| m.get_mut(&queue_id))
                    {
                        jobs.push(job_id.clone());
                    }
                    break;
                }
            }
            pending_tasks.insert(job_id.clone(), tasks);

            let ready = ssn.job(&job_id).map(|j| ssn.job_ready(j)).unwrap_or(false);
            if ready {
                stmt.commit(ssn).await;
            } else {
                let pipelined = ssn
                    .job(&job_id)
                    .map(|j| ssn.job_pipelined(j))
                    .unwrap_or(false);
                if pipelined {
                    stmt.commit(ssn).await;
                } else {
                    debug!(job = %job_id, "gang unsatisfied, discarding statement");
                    stmt.discard(ssn);
                }
            }

            // namespace goes back until its queues drain
            namespaces.push(namespace);
        }

        debug!("leave allocate");
        Ok(())
    }
}

enum Placement {
    Allocate(String),
    Pipeline(String),
    Skip,
    GiveUp,
}

/// Pick a node for one task, or decide to skip it / give up on the job.
fn place_task(ssn: &mut Session, job_id: &JobId, task_id: &TaskId) -> Placement {
    let (node_name, fit_errors) = {
        let Some(task) = ssn.task(task_id) else {
            return Placement::Skip;
        };
        let task = task.clone();

        let Some(job) = ssn.job(job_id) else {
            return Placement::Skip;
        };
        let Some(queue) = ssn.queues.get(&job.queue) else {
            return Placement::Skip;
        };
        // queue share guard: stay within deserved
        if !ssn.allocatable(queue, &task) {
            debug!(task = %task_id, queue = %queue.name, "queue share exhausted for task");
            return Placement::Skip;
        }
        if let Err(err) = ssn.pre_predicate(&task) {
            debug!(task = %task_id, %err, "pre-predicate rejected task");
            return Placement::Skip;
        }

        let nodes = ssn.node_list();
        let fit = |t: &gangway_core::TaskInfo, n: &gangway_core::NodeInfo| {
            if !t.init_resreq.less_equal(&n.future_idle(), DimensionSet::Zero) {
                return Err(FitError::new(&t.name, &n.name, "insufficient resources"));
            }
            ssn.predicate(t, n)
        };
        let (fit_nodes, fit_errors) = util::predicate_nodes(&task, &nodes, &fit, &ssn.cancel);
        if fit_nodes.is_empty() {
            (None, Some(fit_errors))
        } else {
            let candidates: Vec<&gangway_core::NodeInfo> = fit_nodes
                .into_iter()
                .filter(|n| {
                    task.init_resreq.less_equal(&n.idle, DimensionSet::Zero)
                        || task
                            .init_resreq
                            .less_equal(&n.future_idle(), DimensionSet::Zero)
                })
                .collect();
            if candidates.is_empty() {
                (None, None)
            } else {
                let mut scores = ssn.node_scores(&task, &candidates);
                // co-locate gangs: fold hypernode affinity into node scores
                if !ssn.hypernodes.is_empty() {
                    let hyper = ssn.hyper_node_order(job);
                    for (hypernode, bonus) in hyper {
                        if let Some(members) = ssn.hypernodes.leaf_nodes_of(&hypernode) {
                            for node in members {
                                if let Some(score) = scores.get_mut(node) {
                                    *score += bonus;
                                }
                            }
                        }
                    }
                }
                let best = ssn
                    .best_node(&task, &scores)
                    .or_else(|| util::select_best_node(&scores));
                (best, None)
            }
        }
    };

    if let Some(errors) = fit_errors {
        ssn.record_fit_errors(job_id, task_id, errors);
        return Placement::GiveUp;
    }
    let Some(node_name) = node_name else {
        return Placement::Skip;
    };

    let Some(task) = ssn.task(task_id) else {
        return Placement::Skip;
    };
    let Some(node) = ssn.node(&node_name) else {
        return Placement::Skip;
    };
    if task.init_resreq.less_equal(&node.idle, DimensionSet::Zero) {
        Placement::Allocate(node_name)
    } else if task
        .init_resreq
        .less_equal(&node.future_idle(), DimensionSet::Zero)
    {
        debug!(task = %task_id, node = %node_name, "idle short, pipelining against releasing capacity");
        Placement::Pipeline(node_name)
    } else {
        Placement::Skip
    }
}
