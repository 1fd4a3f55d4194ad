//! Shuffle action: evict plugin-selected victims for later re-placement
//!
//! No allocation happens here; the rescheduling strategies name running
//! tasks worth moving, shuffle evicts them, and a following cycle places
//! the freed workload somewhere better.

use async_trait::async_trait;
use tracing::{debug, info};

use gangway_core::{Result, TaskId};

use crate::framework::{Session, Statement};

use super::Action;

pub struct Shuffle;

#[async_trait]
impl Action for Shuffle {
    fn name(&self) -> &str {
        "shuffle"
    }

    async fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter shuffle");

        let running: Vec<TaskId> = ssn
            .jobs
            .values()
            .flat_map(|job| job.tasks.values())
            .filter(|task| task.status.is_occupied())
            .map(|task| task.uid.clone())
            .collect();

        let victims = ssn.victim_tasks(&running);
        if victims.is_empty() {
            debug!("no victims voted this cycle");
            return Ok(());
        }

        let mut stmt = Statement::new();
        for victim in &victims {
            if let Err(err) = stmt.evict(ssn, victim, "rescheduling") {
                tracing::error!(victim = %victim, %err, "failed to evict shuffle victim");
            }
        }
        let evictions = stmt.evictions();
        stmt.commit(ssn).await;

        info!(evictions, "shuffle finished");
        Ok(())
    }
}
