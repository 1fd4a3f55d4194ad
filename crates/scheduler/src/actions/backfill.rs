//! Backfill action: place zero-request tasks wherever predicates allow
//!
//! BestEffort tasks carry no resource request, so allocate skips them;
//! backfill walks every node and takes the first predicate pass.

use async_trait::async_trait;
use tracing::{debug, info};

use gangway_core::{Result, TaskId};

use crate::framework::{Session, Statement};

use super::Action;

pub struct Backfill;

#[async_trait]
impl Action for Backfill {
    fn name(&self) -> &str {
        "backfill"
    }

    async fn execute(&self, ssn: &mut Session) -> Result<()> {
        debug!("enter backfill");

        let mut candidates: Vec<(TaskId, gangway_core::JobId)> = Vec::new();
        for job in ssn.jobs.values() {
            if job.pod_group.phase == gangway_core::PodGroupPhase::Pending {
                continue;
            }
            for task in job.tasks_in(gangway_core::TaskStatus::Pending) {
                if task.best_effort && task.resreq.is_empty() {
                    candidates.push((task.uid.clone(), job.uid.clone()));
                }
            }
        }

        let mut placed = 0usize;
        for (task_id, job_id) in candidates {
            let choice = {
                let Some(task) = ssn.task(&task_id) else {
                    continue;
                };
                let mut fit_errors = gangway_core::FitErrors::new();
                let mut choice = None;
                for node in ssn.node_list() {
                    match ssn.predicate(task, node) {
                        Ok(()) => {
                            choice = Some(node.name.clone());
                            break;
                        }
                        Err(err) => fit_errors.push(err),
                    }
                }
                (choice, fit_errors)
            };

            match choice {
                (Some(node_name), _) => {
                    let mut stmt = Statement::new();
                    match stmt.allocate(ssn, &task_id, &node_name, None) {
                        Ok(()) => {
                            stmt.commit(ssn).await;
                            placed += 1;
                        }
                        Err(err) => {
                            tracing::error!(task = %task_id, %err, "backfill allocation failed");
                            stmt.discard(ssn);
                        }
                    }
                }
                (None, fit_errors) => {
                    ssn.record_fit_errors(&job_id, &task_id, fit_errors);
                }
            }
        }

        info!(placed, "backfill finished");
        Ok(())
    }
}
