//! Running: the gang is up; watch for completion and lifecycle commands

use crate::apis::{JobAction, JobPhase};
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

pub(super) async fn execute(ctl: &Controller, job_info: JobInfo, action: JobAction) -> Result<()> {
    let min_available = job_info.job.spec.min_available;
    let total_replicas = job_info.job.spec.total_replicas();
    match action {
        JobAction::RestartJob => {
            ctl.kill_job(
                job_info,
                Some(&|status| {
                    status.retry_count += 1;
                    status.state.phase = JobPhase::Restarting;
                }),
            )
            .await
        }
        JobAction::AbortJob => {
            ctl.kill_job(
                job_info,
                Some(&|status| {
                    status.state.phase = JobPhase::Aborting;
                }),
            )
            .await
        }
        JobAction::TerminateJob => {
            ctl.kill_job(
                job_info,
                Some(&|status| {
                    status.state.phase = JobPhase::Terminating;
                }),
            )
            .await
        }
        JobAction::CompleteJob => {
            ctl.kill_job(
                job_info,
                Some(&|status| {
                    status.state.phase = JobPhase::Completing;
                }),
            )
            .await
        }
        _ => {
            ctl.sync_job(
                job_info,
                Some(&move |status| {
                    // every replica finished: the job is done
                    if status.succeeded + status.failed >= total_replicas
                        && status.succeeded >= min_available
                    {
                        status.state.phase = JobPhase::Completed;
                    } else {
                        status.state.phase = JobPhase::Running;
                    }
                }),
            )
            .await
        }
    }
}
