//! The scheduling loop: snapshot, open a session, run actions, close

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gangway_core::Result;

use crate::cache::SchedulerCache;
use crate::framework::{registry, SchedulerConf, Session, SessionPorts};

pub struct Scheduler {
    cache: Arc<SchedulerCache>,
    conf: SchedulerConf,
    ports: SessionPorts,
    period: Duration,
}

impl Scheduler {
    pub fn new(
        cache: Arc<SchedulerCache>,
        conf: SchedulerConf,
        ports: SessionPorts,
        period: Duration,
    ) -> Self {
        Self {
            cache,
            conf,
            ports,
            period,
        }
    }

    /// One scheduling cycle. Actions run serially over a single session;
    /// whatever happens, the session closes.
    pub async fn run_once(&self) -> Result<()> {
        let snapshot = self.cache.snapshot();
        let mut ssn = Session::open(snapshot, &self.conf, self.ports.clone());

        for action_name in &self.conf.actions {
            let Some(action) = registry::new_action(action_name) else {
                error!(action = %action_name, "configured action is not registered");
                continue;
            };
            if let Err(err) = action.execute(&mut ssn).await {
                // actions are defensive; anything surfacing here is logged
                // and the cycle moves on
                error!(action = %action_name, %err, "action failed");
            }
        }

        ssn.close().await;
        Ok(())
    }

    /// Run cycles on the configured period until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(period_ms = self.period.as_millis() as u64, "scheduler loop started");
        let mut ticker = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        error!(%err, "scheduling cycle failed");
                    }
                }
            }
        }
    }
}
