//! The job controller: a keyed work queue feeding reconciliation workers
//!
//! Requests are keyed `(namespace, name)` and de-duplicated so at most
//! one reconciliation runs per job at a time. Each worker resolves the
//! job's lifecycle action for the triggering event and drives the phase
//! state machine.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gangway_ports::{
    CompanionClient, EventRecorder, EventType, PodClient, PodGroupClient, PortResult,
};

use crate::apis::{Job, JobAction, JobEvent, JobPhase};
use crate::cache::JobCache;
use crate::error::Result;
use crate::state;

pub const DEFAULT_WORKERS: usize = 5;

/// Where job status writes land; the one cluster write the scheduler
/// ports do not cover.
#[async_trait]
pub trait JobStatusSink: Send + Sync {
    async fn update_job_status(&self, job: &Job) -> PortResult<()>;
}

/// Sink that drops status writes, for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct NullStatusSink;

#[async_trait]
impl JobStatusSink for NullStatusSink {
    async fn update_job_status(&self, _job: &Job) -> PortResult<()> {
        Ok(())
    }
}

/// One unit of reconciliation work.
#[derive(Debug, Clone)]
pub struct Request {
    pub namespace: String,
    pub name: String,
    pub task_name: Option<String>,
    pub event: JobEvent,
    /// Explicit action from a user command; resolved from policies when
    /// absent.
    pub action: Option<JobAction>,
    pub attempts: u32,
}

impl Request {
    pub fn new(namespace: &str, name: &str, event: JobEvent) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            task_name: None,
            event,
            action: None,
            attempts: 0,
        }
    }

    pub fn with_action(mut self, action: JobAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_task(mut self, task: &str) -> Self {
        self.task_name = Some(task.to_string());
        self
    }

    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Cluster-facing dependencies of the controller.
#[derive(Clone)]
pub struct ControllerPorts {
    pub pods: Arc<dyn PodClient>,
    pub pod_groups: Arc<dyn PodGroupClient>,
    pub companions: Arc<dyn CompanionClient>,
    pub status: Arc<dyn JobStatusSink>,
    pub recorder: Arc<dyn EventRecorder>,
}

pub struct Controller {
    pub(crate) cache: Arc<JobCache>,
    pub(crate) ports: ControllerPorts,
    queue_tx: mpsc::UnboundedSender<Request>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Request>>,
    /// keys with a queued request; duplicates collapse onto it
    queued: DashMap<String, ()>,
    workers: usize,
}

impl Controller {
    pub fn new(cache: Arc<JobCache>, ports: ControllerPorts, workers: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            cache,
            ports,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            queued: DashMap::new(),
            workers: workers.max(1),
        })
    }

    pub fn cache(&self) -> &JobCache {
        &self.cache
    }

    /// Queue a reconciliation; a request already waiting for the same job
    /// absorbs this one.
    pub fn enqueue(&self, request: Request) {
        let key = request.key();
        if request.action.is_none() && self.queued.insert(key.clone(), ()).is_some() {
            debug!(%key, "request collapsed onto queued reconciliation");
            return;
        }
        if self.queue_tx.send(request).is_err() {
            warn!(%key, "controller queue closed, dropping request");
        }
    }

    /// Run the worker pool until cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(workers = self.workers, "job controller started");
        let mut handles = Vec::new();
        for worker in 0..self.workers {
            let ctl = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let request = {
                        let mut rx = ctl.queue_rx.lock().await;
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            request = rx.recv() => request,
                        }
                    };
                    let Some(request) = request else { return };
                    ctl.queued.remove(&request.key());
                    ctl.handle(request, worker).await;
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        info!("job controller stopped");
    }

    async fn handle(&self, request: Request, worker: usize) {
        debug!(worker, job = %request.key(), event = ?request.event, "reconciling");
        if let Err(err) = self.process(&request).await {
            error!(job = %request.key(), %err, "reconciliation failed");
            self.retry(request, &err.to_string());
        }
    }

    /// One reconciliation: resolve the action, run the phase machine.
    pub async fn process(&self, request: &Request) -> Result<()> {
        let Some(job_info) = self.cache.get(&request.namespace, &request.name) else {
            debug!(job = %request.key(), "job vanished before reconciliation");
            return Ok(());
        };
        let action = request.action.unwrap_or_else(|| {
            job_info
                .job
                .action_for(request.task_name.as_deref(), request.event)
        });
        debug!(job = %request.key(), ?action, phase = %job_info.job.status.state.phase, "executing state machine");
        state::execute(self, job_info, action).await
    }

    /// Bounded retry: requeue up to the job's maxRetry, then fail the job.
    fn retry(&self, mut request: Request, reason: &str) {
        let max_retry = self
            .cache
            .get(&request.namespace, &request.name)
            .map(|info| info.job.spec.max_retry)
            .unwrap_or(0);
        request.attempts += 1;
        if request.attempts <= max_retry {
            debug!(job = %request.key(), attempts = request.attempts, "requeueing");
            let _ = self.queue_tx.send(request);
            return;
        }
        self.ports.recorder.record(
            &request.key(),
            EventType::Warning,
            "ReconcileFailed",
            reason,
        );
        if let Some(mut info) = self.cache.get(&request.namespace, &request.name) {
            info.job.status.state.phase = JobPhase::Failed;
            info.job.status.state.reason = "RetriesExhausted".to_string();
            info.job.status.state.message = reason.to_string();
            self.cache.update_job_status(&info.job);
        }
        warn!(job = %request.key(), "retries exhausted, job marked failed");
    }
}
