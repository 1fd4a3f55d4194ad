//! Pending: pods are being created; the gang is not yet running

use crate::apis::{JobAction, JobPhase};
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

pub(super) async fn execute(ctl: &Controller, job_info: JobInfo, action: JobAction) -> Result<()> {
    let min_available = job_info.job.spec.min_available;
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
        JobAction::CompleteJob => {
            ctl.kill_job(
                job_info,
                Some(&|status| {
                    status.state.phase = JobPhase::Completing;
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
        _ => {
            ctl.sync_job(
                job_info,
                Some(&move |status| {
                    status.state.phase =
                        if min_available <= status.running + status.succeeded + status.failed {
                            JobPhase::Running
                        } else {
                            JobPhase::Pending
                        };
                }),
            )
            .await
        }
    }
}
