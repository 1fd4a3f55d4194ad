//! Terminal phases: nothing left to reconcile

use tracing::debug;

use crate::apis::JobAction;
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

pub(super) async fn execute(
    _ctl: &Controller,
    job_info: JobInfo,
    action: JobAction,
) -> Result<()> {
    debug!(job = %job_info.job.key(), phase = %job_info.job.status.state.phase, ?action, "job is terminal, ignoring");
    Ok(())
}
