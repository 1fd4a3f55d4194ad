//! Enqueue action: admit pending podgroups into their queues
//!
//! Voting plugins decide whether a queue can take the job's min
//! resources; a permit flips the podgroup to Inqueue and reserves the
//! floor against the queue's inqueue accumulator, a reject leaves the
//! podgroup pending with an Unschedulable event.

use std::cmp::Ordering;

use async_trait::async_trait;
use gangway_ports::EventType;
use tracing::{debug, info};

use gangway_core::{JobId, PodGroupPhase, QueueId, Result};

use crate::framework::Session;
use crate::util;

use super::Action;

pub struct Enqueue;

#[async_trait]
impl Action for Enqueue {
    fn name(&self) -> &str {
        "enqueue"
    }

    async fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter enqueue");

        let mut queues: Vec<QueueId> = ssn.queues.keys().cloned().collect();
        let mut admitted = 0usize;

        while let Some(queue_id) = util::pop_min_by(&mut queues, |l, r| {
            match (ssn.queues.get(l), ssn.queues.get(r)) {
                (Some(l), Some(r)) => ssn.queue_order(l, r),
                _ => Ordering::Equal,
            }
        }) {
            let mut job_ids: Vec<JobId> = ssn
                .jobs
                .values()
                .filter(|job| job.queue == queue_id)
                .filter(|job| job.pod_group.phase == PodGroupPhase::Pending)
                .map(|job| job.uid.clone())
                .collect();

            while let Some(job_id) = util::pop_min_by(&mut job_ids, |l, r| {
                match (ssn.job(l), ssn.job(r)) {
                    (Some(l), Some(r)) => ssn.job_order(l, r),
                    _ => Ordering::Equal,
                }
            }) {
                let permitted = ssn
                    .job(&job_id)
                    .map(|job| ssn.job_enqueueable(job))
                    .unwrap_or(false);
                if permitted {
                    if let Some(job) = ssn.job(&job_id) {
                        ssn.job_enqueued(job);
                    }
                    if let Some(job) = ssn.jobs.get_mut(&job_id) {
                        job.pod_group.phase = PodGroupPhase::Inqueue;
                    }
                    admitted += 1;
                    debug!(job = %job_id, "podgroup admitted to queue");
                } else {
                    ssn.record_event(
                        job_id.as_str(),
                        EventType::Warning,
                        "Unschedulable",
                        "job is rejected by enqueue voting",
                    );
                }
            }
        }

        info!(admitted, "enqueue finished");
        Ok(())
    }
}
