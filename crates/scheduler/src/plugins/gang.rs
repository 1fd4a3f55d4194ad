//! Gang plugin: all-or-nothing admission for jobs with a MinAvailable
//!
//! Readiness gates commits, pipelining gates keeping a statement, and the
//! evictable hooks refuse victims whose loss would drop a running gang
//! below its floor.

use std::collections::HashMap;

use gangway_core::{JobId, TaskId};

use crate::framework::{
    Arguments, Plugin, Session, ValidateResult, Vote,
};

pub const PLUGIN_NAME: &str = "gang";

/// When set (the default), reclaim refuses partial evictions that would
/// break a victim gang; switch off to allow partial reclaim.
const GANG_CHECK_KEY: &str = "enableGangCheckOverused";

pub fn new(arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(GangPlugin { arguments })
}

struct GangPlugin {
    arguments: Arguments,
}

/// Victims whose eviction keeps every affected gang at or above its
/// MinAvailable. Bookkeeping is per candidate job so several victims from
/// one job count cumulatively.
fn gang_safe_victims(ssn: &Session, candidates: &[TaskId]) -> Vec<TaskId> {
    let mut occupied_left: HashMap<JobId, i64> = HashMap::new();
    let mut victims = Vec::new();
    for uid in candidates {
        let Some(task) = ssn.task(uid) else {
            continue;
        };
        let Some(job) = ssn.job(&task.job) else {
            continue;
        };
        let left = occupied_left
            .entry(job.uid.clone())
            .or_insert_with(|| job.ready_task_num() as i64);
        if *left > job.min_available as i64 {
            *left -= 1;
            victims.push(uid.clone());
        }
    }
    victims
}

impl Plugin for GangPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        let gang_check = self.arguments.get_bool(GANG_CHECK_KEY, true);

        ssn.add_job_valid_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, job| {
                if (job.tasks.len() as u32) < job.min_available {
                    return Some(ValidateResult {
                        pass: false,
                        reason: "NotEnoughTasks".to_string(),
                        message: format!(
                            "job has {} tasks, fewer than minAvailable {}",
                            job.tasks.len(),
                            job.min_available
                        ),
                    });
                }
                let mut scheduler = None;
                for task in job.tasks.values() {
                    let name = &task.pod.spec.scheduler_name;
                    match scheduler {
                        None => scheduler = Some(name),
                        Some(s) if s != name => {
                            return Some(ValidateResult {
                                pass: false,
                                reason: "MultipleSchedulers".to_string(),
                                message: format!(
                                    "tasks span schedulers {s} and {name}"
                                ),
                            });
                        }
                        _ => {}
                    }
                }
                None
            }),
        );

        ssn.add_job_ready_fn(PLUGIN_NAME, Box::new(|_ssn, job| job.is_ready()));

        ssn.add_job_pipelined_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, job| {
                if job.is_pipelined() {
                    Vote::Permit
                } else {
                    Vote::Reject
                }
            }),
        );

        ssn.add_job_starving_fn(PLUGIN_NAME, Box::new(|_ssn, job| job.is_starving()));

        // Jobs still short of their gang sort ahead of satisfied ones.
        ssn.add_job_order_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, l, r| {
                let l_ready = l.is_ready();
                let r_ready = r.is_ready();
                match (l_ready, r_ready) {
                    (true, false) => std::cmp::Ordering::Greater,
                    (false, true) => std::cmp::Ordering::Less,
                    _ => std::cmp::Ordering::Equal,
                }
            }),
        );

        ssn.add_preemptable_fn(
            PLUGIN_NAME,
            Box::new(|ssn, _preemptor, candidates| Some(gang_safe_victims(ssn, candidates))),
        );

        if gang_check {
            ssn.add_reclaimable_fn(
                PLUGIN_NAME,
                Box::new(|ssn, _reclaimer, candidates| Some(gang_safe_victims(ssn, candidates))),
            );
        }
    }
}
