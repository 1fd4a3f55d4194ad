//! Completing: draining toward Completed

use crate::apis::{JobAction, JobPhase};
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

use super::undrained;

pub(super) async fn execute(ctl: &Controller, job_info: JobInfo, _action: JobAction) -> Result<()> {
    ctl.kill_job(
        job_info,
        Some(&|status| {
            status.state.phase = if undrained(status) {
                JobPhase::Completing
            } else {
                JobPhase::Completed
            };
        }),
    )
    .await
}
