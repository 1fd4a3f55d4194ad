//! Aborting: draining toward Aborted, unless the user resumes

use crate::apis::{JobAction, JobPhase};
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

use super::undrained;

pub(super) async fn execute(ctl: &Controller, job_info: JobInfo, action: JobAction) -> Result<()> {
    match action {
        JobAction::ResumeJob => {
            ctl.sync_job(
                job_info,
                Some(&|status| {
                    status.retry_count += 1;
                    status.state.phase = JobPhase::Restarting;
                }),
            )
            .await
        }
        _ => {
            ctl.kill_job(
                job_info,
                Some(&|status| {
                    status.state.phase = if undrained(status) {
                        JobPhase::Aborting
                    } else {
                        JobPhase::Aborted
                    };
                }),
            )
            .await
        }
    }
}
