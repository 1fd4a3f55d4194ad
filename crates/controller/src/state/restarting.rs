//! Restarting: tear the old version down, then fall back to Pending

use crate::apis::{JobAction, JobPhase};
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

use super::undrained;

pub(super) async fn execute(ctl: &Controller, job_info: JobInfo, _action: JobAction) -> Result<()> {
    let max_retry = job_info.job.spec.max_retry;
    ctl.kill_job(
        job_info,
        Some(&move |status| {
            if status.retry_count > max_retry {
                status.state.phase = JobPhase::Failed;
                status.state.reason = "RetriesExhausted".to_string();
                return;
            }
            // stay here until the old pods are really gone
            status.state.phase = if undrained(status) {
                JobPhase::Restarting
            } else {
                JobPhase::Pending
            };
        }),
    )
    .await
}
