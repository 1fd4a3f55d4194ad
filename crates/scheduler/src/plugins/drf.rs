//! DRF plugin: dominant resource fairness across jobs
//!
//! A job's share is the largest fraction any single dimension of its
//! allocation takes of the cluster total; jobs with the smaller dominant
//! share schedule first, and only a larger-share job may preempt.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use gangway_core::{JobId, Resource, TaskId};

use crate::framework::{Arguments, EventHandler, Plugin, Session};

pub const PLUGIN_NAME: &str = "drf";

pub fn new(_arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(DrfPlugin {
        state: Arc::new(Mutex::new(State::default())),
    })
}

#[derive(Debug, Default)]
struct JobAttr {
    allocated: Resource,
    share: f64,
}

#[derive(Debug, Default)]
struct State {
    total_resource: Resource,
    job_attrs: HashMap<JobId, JobAttr>,
}

impl State {
    fn update_share(&mut self, job: &JobId) {
        let total = self.total_resource.clone();
        if let Some(attr) = self.job_attrs.get_mut(job) {
            attr.share = dominant_share(&attr.allocated, &total);
        }
    }
}

fn dominant_share(allocated: &Resource, total: &Resource) -> f64 {
    let mut share: f64 = 0.0;
    for name in total.resource_names() {
        let cap = total.get(&name);
        if cap <= 0.0 {
            continue;
        }
        share = share.max(allocated.get(&name) / cap);
    }
    share
}

struct DrfPlugin {
    state: Arc<Mutex<State>>,
}

impl Plugin for DrfPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        {
            let mut state = self.state.lock();
            state.total_resource = ssn.total_resource.clone();
            for job in ssn.jobs.values() {
                let attr = JobAttr {
                    allocated: job.allocated(),
                    share: 0.0,
                };
                state.job_attrs.insert(job.uid.clone(), attr);
            }
            let ids: Vec<JobId> = state.job_attrs.keys().cloned().collect();
            for id in ids {
                state.update_share(&id);
            }
        }

        let state = Arc::clone(&self.state);
        ssn.add_job_order_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, l, r| {
                let state = state.lock();
                let ls = state.job_attrs.get(&l.uid).map(|a| a.share).unwrap_or(0.0);
                let rs = state.job_attrs.get(&r.uid).map(|a| a.share).unwrap_or(0.0);
                ls.partial_cmp(&rs).unwrap_or(std::cmp::Ordering::Equal)
            }),
        );

        let state = Arc::clone(&self.state);
        ssn.add_preemptable_fn(
            PLUGIN_NAME,
            Box::new(move |ssn, preemptor, candidates| {
                let state = state.lock();
                let Some(preemptor_job) = ssn.job(&preemptor.job) else {
                    return None;
                };
                let preemptor_share = state
                    .job_attrs
                    .get(&preemptor_job.uid)
                    .map(|a| a.share)
                    .unwrap_or(0.0);
                let victims: Vec<TaskId> = candidates
                    .iter()
                    .filter(|uid| {
                        ssn.job_of_task(uid)
                            .and_then(|job| state.job_attrs.get(&job.uid))
                            .map(|attr| attr.share > preemptor_share)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                Some(victims)
            }),
        );

        let alloc_state = Arc::clone(&self.state);
        let dealloc_state = Arc::clone(&self.state);
        ssn.add_event_handler(EventHandler {
            allocate: Some(Box::new(move |event| {
                let mut state = alloc_state.lock();
                if let Some(attr) = state.job_attrs.get_mut(&event.job) {
                    attr.allocated.add(&event.resreq);
                }
                state.update_share(&event.job);
            })),
            deallocate: Some(Box::new(move |event| {
                let mut state = dealloc_state.lock();
                if let Some(attr) = state.job_attrs.get_mut(&event.job) {
                    let _ = attr.allocated.sub(&event.resreq);
                }
                state.update_share(&event.job);
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

    #[test]
    fn dominant_share_takes_the_largest_fraction() {
        let total = Resource::new(10_000.0, 100.0 * 1024.0 * 1024.0 * 1024.0);
        // cpu-dominant allocation
        let allocated = Resource::new(5_000.0, 10.0 * 1024.0 * 1024.0 * 1024.0);
        let share = dominant_share(&allocated, &total);
        assert!((share - 0.5).abs() < 1e-9);
    }
}
