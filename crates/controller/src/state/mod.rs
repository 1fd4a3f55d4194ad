//! The per-job phase state machine
//!
//! One module per phase; each resolves an action into a SyncJob or
//! KillJob invocation whose status closure decides the next phase.

mod aborting;
mod completing;
mod finished;
mod pending;
mod restarting;
mod running;
mod terminating;

use crate::apis::{JobAction, JobPhase};
use crate::cache::JobInfo;
use crate::controller::Controller;
use crate::error::Result;

/// Run one transition for the job's current phase.
pub(crate) async fn execute(ctl: &Controller, job_info: JobInfo, action: JobAction) -> Result<()> {
    match job_info.job.status.state.phase {
        JobPhase::Pending => pending::execute(ctl, job_info, action).await,
        JobPhase::Running => running::execute(ctl, job_info, action).await,
        JobPhase::Restarting => restarting::execute(ctl, job_info, action).await,
        JobPhase::Aborting => aborting::execute(ctl, job_info, action).await,
        JobPhase::Completing => completing::execute(ctl, job_info, action).await,
        JobPhase::Terminating => terminating::execute(ctl, job_info, action).await,
        JobPhase::Aborted | JobPhase::Completed | JobPhase::Terminated | JobPhase::Failed => {
            finished::execute(ctl, job_info, action).await
        }
    }
}

/// Pods still alive or on their way out.
fn undrained(status: &crate::apis::JobStatus) -> bool {
    status.terminating != 0 || status.pending != 0 || status.running != 0
}
