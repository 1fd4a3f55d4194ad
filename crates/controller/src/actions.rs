//! SyncJob and KillJob: the two primitives every phase transition uses

use std::collections::BTreeMap;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gangway_core::{Pod, PodGroup, PodGroupPhase, PodPhase};
use gangway_ports::EventType;

use crate::apis::{pod_name, Job, JobStatus, TaskSpec};
use crate::cache::{JobInfo, JOB_LABEL, TASK_LABEL, VERSION_ANNOTATION};
use crate::controller::Controller;
use crate::error::{ControllerError, Result};
use crate::plugins;

/// Mutates the recomputed status before it is written back; returns
/// nothing because the phase decision is the whole point.
pub type UpdateStatusFn<'a> = &'a (dyn Fn(&mut JobStatus) + Sync);

impl Controller {
    /// Drive the job toward its spec: create missing pods, delete
    /// superfluous ones, ensure companion objects, and rewrite the status
    /// counters from what was observed.
    pub(crate) async fn sync_job(
        &self,
        mut job_info: JobInfo,
        update_status: Option<UpdateStatusFn<'_>>,
    ) -> Result<()> {
        let job = &mut job_info.job;
        debug!(job = %job.key(), version = job.status.version, "syncing job");

        if job.deletion_timestamp.is_some() {
            info!(job = %job.key(), "job is terminating, skipping sync");
            return Ok(());
        }

        self.create_pod_group_if_absent(job).await?;
        self.create_job_io_if_absent(job).await?;
        if let Err(err) = plugins::on_job_add(job, self.ports.companions.as_ref()).await {
            self.ports.recorder.record(
                &job.key(),
                EventType::Warning,
                "PluginError",
                &format!("execute plugin when job add failed: {err}"),
            );
            return Err(err);
        }

        let mut pending = 0u32;
        let mut running = 0u32;
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut terminating = 0u32;
        let mut to_create: Vec<Pod> = Vec::new();
        let mut to_delete: Vec<Pod> = Vec::new();

        for task in &job.spec.tasks {
            let mut observed = job_info.pods.get(&task.name).cloned().unwrap_or_default();
            for index in 0..task.replicas {
                let name = pod_name(&job.name, &task.name, index);
                match observed.remove(&name) {
                    None => {
                        let mut pod = build_task_pod(job, task, index);
                        plugins::on_pod_create(&mut pod, job)?;
                        to_create.push(pod);
                    }
                    Some(pod) => {
                        if pod.is_terminating() {
                            terminating += 1;
                            continue;
                        }
                        match pod.phase {
                            PodPhase::Pending => pending += 1,
                            PodPhase::Running => running += 1,
                            PodPhase::Succeeded => succeeded += 1,
                            PodPhase::Failed => failed += 1,
                            PodPhase::Unknown => {}
                        }
                    }
                }
            }
            // anything left over no longer matches a (task, index) slot
            to_delete.extend(observed.into_values());
        }

        let create_total = to_create.len();
        let results = join_all(to_create.iter().map(|pod| self.ports.pods.create_pod(pod))).await;
        let mut create_failures = 0usize;
        for (pod, result) in to_create.iter().zip(results) {
            match result {
                Ok(()) => pending += 1,
                Err(err) if err.is_already_exists() => pending += 1,
                Err(err) => {
                    warn!(pod = %pod.name, %err, "pod creation failed");
                    create_failures += 1;
                }
            }
        }
        if create_failures > 0 {
            return Err(ControllerError::CreatePods {
                failed: create_failures,
                total: create_total,
            });
        }

        let delete_total = to_delete.len();
        let results = join_all(
            to_delete
                .iter()
                .map(|pod| self.ports.pods.delete_pod(&pod.namespace, &pod.name)),
        )
        .await;
        let mut delete_failures = 0usize;
        for (pod, result) in to_delete.iter().zip(results) {
            match result {
                Ok(()) => terminating += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(pod = %pod.name, %err, "pod deletion failed");
                    delete_failures += 1;
                }
            }
        }
        if delete_failures > 0 {
            return Err(ControllerError::DeletePods {
                failed: delete_failures,
                total: delete_total,
            });
        }

        job.status = JobStatus {
            state: job.status.state.clone(),
            pending,
            running,
            succeeded,
            failed,
            terminating,
            min_available: job.spec.min_available,
            version: job.status.version,
            retry_count: job.status.retry_count,
        };
        if let Some(update) = update_status {
            update(&mut job.status);
        }
        self.ports.status.update_job_status(job).await?;
        self.cache.update_job_status(job);
        debug!(job = %job.key(), phase = %job.status.state.phase, "sync finished");
        Ok(())
    }

    /// Tear the job down: bump the version, delete every pod, drop the
    /// podgroup and plugin-owned companions. Partial failure reports
    /// `failed to kill N of M` and the request requeues.
    pub(crate) async fn kill_job(
        &self,
        mut job_info: JobInfo,
        update_status: Option<UpdateStatusFn<'_>>,
    ) -> Result<()> {
        let job = &mut job_info.job;
        debug!(job = %job.key(), version = job.status.version, "killing job");

        if job.deletion_timestamp.is_some() {
            info!(job = %job.key(), "job is terminating, skipping kill");
            return Ok(());
        }

        let mut pending = 0u32;
        let mut running = 0u32;
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut terminating = 0u32;

        let mut to_delete: Vec<&Pod> = Vec::new();
        let mut total = 0usize;
        for pods in job_info.pods.values() {
            for pod in pods.values() {
                total += 1;
                if pod.is_terminating() {
                    terminating += 1;
                    continue;
                }
                to_delete.push(pod);
            }
        }
        // a kill with nothing left to delete is a no-op version-wise;
        // repeated kills converge instead of bumping forever
        if total > 0 {
            job.status.version += 1;
        }

        let results = join_all(
            to_delete
                .iter()
                .map(|pod| self.ports.pods.delete_pod(&pod.namespace, &pod.name)),
        )
        .await;
        let mut failures = 0usize;
        for (pod, result) in to_delete.iter().zip(results) {
            match result {
                Ok(()) => terminating += 1,
                Err(err) if err.is_not_found() => terminating += 1,
                Err(err) => {
                    warn!(pod = %pod.name, %err, "pod kill failed");
                    failures += 1;
                    match pod.phase {
                        PodPhase::Pending => pending += 1,
                        PodPhase::Running => running += 1,
                        PodPhase::Succeeded => succeeded += 1,
                        PodPhase::Failed => failed += 1,
                        PodPhase::Unknown => {}
                    }
                }
            }
        }
        if failures > 0 {
            return Err(ControllerError::KillPods {
                failed: failures,
                total,
            });
        }

        job.status = JobStatus {
            state: job.status.state.clone(),
            pending,
            running,
            succeeded,
            failed,
            terminating,
            min_available: job.spec.min_available,
            version: job.status.version,
            retry_count: job.status.retry_count,
        };
        if let Some(update) = update_status {
            update(&mut job.status);
        }
        self.ports.status.update_job_status(job).await?;
        self.cache.update_job_status(job);

        match self
            .ports
            .pod_groups
            .delete_pod_group(&job.namespace, &job.name)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        plugins::on_job_delete(job, self.ports.companions.as_ref()).await?;

        // input/output claims survive until the job object itself goes
        debug!(job = %job.key(), phase = %job.status.state.phase, "kill finished");
        Ok(())
    }

    async fn create_pod_group_if_absent(&self, job: &Job) -> Result<()> {
        let pod_group = PodGroup {
            namespace: job.namespace.clone(),
            name: job.name.clone(),
            min_member: job.spec.min_available,
            min_resources: Some(job.min_resources(|_| 0)),
            queue: job.spec.queue().into(),
            priority_class_name: job.spec.priority_class_name.clone(),
            phase: PodGroupPhase::Pending,
            creation_timestamp: job.creation_timestamp,
        };
        match self.ports.pod_groups.create_pod_group(&pod_group).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_job_io_if_absent(&self, job: &Job) -> Result<()> {
        for volume in [&job.spec.input, &job.spec.output].into_iter().flatten() {
            match self
                .ports
                .companions
                .create_volume_claim(&job.namespace, &volume.volume_claim_name)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_already_exists() => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Materialize the pod for `(task, index)` from the task template.
fn build_task_pod(job: &Job, task: &TaskSpec, index: u32) -> Pod {
    let mut labels: BTreeMap<String, String> = task.labels.clone();
    labels.insert(JOB_LABEL.to_string(), job.name.clone());
    labels.insert(TASK_LABEL.to_string(), task.name.clone());

    let mut annotations = BTreeMap::new();
    annotations.insert(
        VERSION_ANNOTATION.to_string(),
        job.status.version.to_string(),
    );

    let mut spec = task.template.clone();
    if spec.scheduler_name.is_empty() {
        spec.scheduler_name = job.spec.scheduler_name.clone();
    }
    if spec.priority_class_name.is_none() {
        spec.priority_class_name = job.spec.priority_class_name.clone();
    }
    for volume in [&job.spec.input, &job.spec.output].into_iter().flatten() {
        if !spec.volumes.contains(&volume.volume_claim_name) {
            spec.volumes.push(volume.volume_claim_name.clone());
        }
    }

    Pod {
        uid: Uuid::new_v4().to_string(),
        namespace: job.namespace.clone(),
        name: pod_name(&job.name, &task.name, index),
        labels,
        annotations,
        spec,
        phase: PodPhase::Pending,
        node_name: None,
        deletion_timestamp: None,
        creation_timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::JobSpec;
    use gangway_core::{PodSpec, Resource};

    fn job() -> Job {
        Job {
            uid: "u1".into(),
            namespace: "default".into(),
            name: "train".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: JobSpec {
                min_available: 1,
                scheduler_name: "gangway".into(),
                queue: None,
                tasks: vec![TaskSpec {
                    name: "worker".into(),
                    replicas: 2,
                    template: PodSpec {
                        resources: Resource::new(500.0, 0.0),
                        ..Default::default()
                    },
                    labels: Default::default(),
                    policies: vec![],
                }],
                policies: vec![],
                plugins: Default::default(),
                max_retry: 3,
                input: None,
                output: None,
                priority_class_name: Some("mid".into()),
            },
            status: JobStatus::default(),
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        }
    }

    #[test]
    fn built_pod_carries_ownership_labels() {
        let job = job();
        let pod = build_task_pod(&job, &job.spec.tasks[0], 1);
        assert_eq!(pod.name, "train-worker-1");
        assert_eq!(pod.labels[JOB_LABEL], "train");
        assert_eq!(pod.labels[TASK_LABEL], "worker");
        assert_eq!(pod.annotations[VERSION_ANNOTATION], "0");
        assert_eq!(pod.spec.scheduler_name, "gangway");
        assert_eq!(pod.spec.priority_class_name.as_deref(), Some("mid"));
    }
}
