//! Controller-side job cache: job resources plus their observed pods

use std::collections::HashMap;

use dashmap::DashMap;
use thiserror::Error;

use gangway_core::Pod;

use crate::apis::Job;

/// Label every controller-owned pod carries naming its task.
pub const TASK_LABEL: &str = "gangway.sh/task";
/// Label naming the owning job.
pub const JOB_LABEL: &str = "gangway.sh/job";
/// Annotation carrying the job status version the pod was created under.
pub const VERSION_ANNOTATION: &str = "gangway.sh/job-version";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("job {0} not found in cache")]
    JobNotFound(String),

    #[error("pod {0} carries no task label")]
    UnlabeledPod(String),
}

/// One job with its pods grouped by task name.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub job: Job,
    /// task name -> pod name -> pod
    pub pods: HashMap<String, HashMap<String, Pod>>,
}

impl JobInfo {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            pods: HashMap::new(),
        }
    }

    pub fn pod_count(&self) -> usize {
        self.pods.values().map(|m| m.len()).sum()
    }
}

/// Keyed by `namespace/name`; one entry per observed job resource.
#[derive(Default)]
pub struct JobCache {
    jobs: DashMap<String, JobInfo>,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&self, job: Job) {
        let key = job.key();
        match self.jobs.get_mut(&key) {
            Some(mut entry) => entry.job = job,
            None => {
                self.jobs.insert(key, JobInfo::new(job));
            }
        }
    }

    pub fn update_job(&self, job: Job) {
        self.add_job(job);
    }

    pub fn delete_job(&self, namespace: &str, name: &str) {
        self.jobs.remove(&format!("{namespace}/{name}"));
    }

    pub fn add_pod(&self, pod: Pod) -> Result<(), CacheError> {
        let job_name = pod
            .labels
            .get(JOB_LABEL)
            .ok_or_else(|| CacheError::UnlabeledPod(pod.name.clone()))?;
        let task_name = pod
            .labels
            .get(TASK_LABEL)
            .ok_or_else(|| CacheError::UnlabeledPod(pod.name.clone()))?
            .clone();
        let key = format!("{}/{}", pod.namespace, job_name);
        let mut entry = self
            .jobs
            .get_mut(&key)
            .ok_or(CacheError::JobNotFound(key))?;
        entry
            .pods
            .entry(task_name)
            .or_default()
            .insert(pod.name.clone(), pod);
        Ok(())
    }

    pub fn delete_pod(&self, pod: &Pod) -> Result<(), CacheError> {
        let job_name = pod
            .labels
            .get(JOB_LABEL)
            .ok_or_else(|| CacheError::UnlabeledPod(pod.name.clone()))?;
        let key = format!("{}/{}", pod.namespace, job_name);
        let mut entry = self
            .jobs
            .get_mut(&key)
            .ok_or(CacheError::JobNotFound(key))?;
        for pods in entry.pods.values_mut() {
            pods.remove(&pod.name);
        }
        Ok(())
    }

    /// Value-clone of one job with its pods, for a reconciliation run.
    pub fn get(&self, namespace: &str, name: &str) -> Option<JobInfo> {
        self.jobs
            .get(&format!("{namespace}/{name}"))
            .map(|e| e.clone())
    }

    /// Persist a reconciliation's view of the job back into the cache.
    pub fn update_job_status(&self, job: &Job) {
        if let Some(mut entry) = self.jobs.get_mut(&job.key()) {
            entry.job.status = job.status.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{JobSpec, JobStatus};
    use chrono::Utc;
    use gangway_core::{PodPhase, PodSpec};

    fn job(name: &str) -> Job {
        Job {
            uid: name.into(),
            namespace: "default".into(),
            name: name.into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: JobSpec {
                min_available: 1,
                scheduler_name: "gangway".into(),
                queue: None,
                tasks: vec![],
                policies: vec![],
                plugins: Default::default(),
                max_retry: 3,
                input: None,
                output: None,
                priority_class_name: None,
            },
            status: JobStatus::default(),
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        }
    }

    fn pod(job: &str, task: &str, name: &str) -> Pod {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(JOB_LABEL.to_string(), job.to_string());
        labels.insert(TASK_LABEL.to_string(), task.to_string());
        Pod {
            uid: name.into(),
            namespace: "default".into(),
            name: name.into(),
            labels,
            annotations: Default::default(),
            spec: PodSpec::default(),
            phase: PodPhase::Pending,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        }
    }

    #[test]
    fn pods_index_under_their_task() {
        let cache = JobCache::new();
        cache.add_job(job("train"));
        cache.add_pod(pod("train", "worker", "train-worker-0")).unwrap();
        cache.add_pod(pod("train", "worker", "train-worker-1")).unwrap();
        cache.add_pod(pod("train", "master", "train-master-0")).unwrap();

        let info = cache.get("default", "train").unwrap();
        assert_eq!(info.pod_count(), 3);
        assert_eq!(info.pods["worker"].len(), 2);
        assert_eq!(info.pods["master"].len(), 1);
    }

    #[test]
    fn unknown_job_pod_is_an_error() {
        let cache = JobCache::new();
        assert!(matches!(
            cache.add_pod(pod("ghost", "worker", "ghost-worker-0")),
            Err(CacheError::JobNotFound(_))
        ));
    }
}
