//! The Job resource schema and its lifecycle vocabulary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gangway_core::{PodSpec, Resource};

pub const DEFAULT_QUEUE: &str = "default";

/// Pod naming contract: `{job}-{task}-{index}` uniquely identifies a task
/// pod.
pub fn pod_name(job: &str, task: &str, index: u32) -> String {
    format!("{job}-{task}-{index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobEvent {
    PodFailed,
    PodEvicted,
    Unknown,
    OutOfSync,
    CommandIssued,
    TaskCompleted,
    PluginError,
    /// Matches every event; written `*` in manifests.
    AnyEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobAction {
    AbortJob,
    RestartJob,
    RestartTask,
    TerminateJob,
    CompleteJob,
    ResumeJob,
    SyncJob,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Restarting,
    Aborting,
    Aborted,
    Completing,
    Completed,
    Terminating,
    Terminated,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Aborted | JobPhase::Completed | JobPhase::Terminated | JobPhase::Failed
        )
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// event -> action mapping, matched in order: exact event, then AnyEvent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    pub event: JobEvent,
    pub action: JobAction,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub replicas: u32,
    pub template: PodSpec,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub policies: Vec<LifecyclePolicy>,
}

/// Persistent volume wiring for job input/output data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub volume_claim_name: String,
    #[serde(default)]
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub min_available: u32,
    #[serde(default)]
    pub scheduler_name: String,
    #[serde(default)]
    pub queue: Option<String>,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub policies: Vec<LifecyclePolicy>,
    /// plugin name -> raw arguments
    #[serde(default)]
    pub plugins: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub max_retry: u32,
    #[serde(default)]
    pub input: Option<VolumeSpec>,
    #[serde(default)]
    pub output: Option<VolumeSpec>,
    #[serde(default)]
    pub priority_class_name: Option<String>,
}

impl JobSpec {
    pub fn queue(&self) -> &str {
        self.queue.as_deref().unwrap_or(DEFAULT_QUEUE)
    }

    pub fn total_replicas(&self) -> u32 {
        self.tasks.iter().map(|t| t.replicas).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub phase: JobPhase,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub pending: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub terminating: u32,
    pub min_available: u32,
    /// Bumped once per kill; pods from older versions are stale.
    pub version: u32,
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: JobSpec,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub creation_timestamp: DateTime<Utc>,
}

impl Job {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Resolve the action for an event: task-level policies first (exact
    /// then AnyEvent), then job-level, then the SyncJob default.
    pub fn action_for(&self, task_name: Option<&str>, event: JobEvent) -> JobAction {
        if let Some(task_name) = task_name {
            if let Some(task) = self.spec.tasks.iter().find(|t| t.name == task_name) {
                if let Some(action) = match_policies(&task.policies, event) {
                    return action;
                }
            }
        }
        match_policies(&self.spec.policies, event).unwrap_or(JobAction::SyncJob)
    }

    /// The floor the podgroup advertises: requests of the MinAvailable
    /// highest-priority replicas.
    pub fn min_resources(&self, priority_of: impl Fn(&str) -> i32) -> Resource {
        let mut tasks: Vec<&TaskSpec> = self.spec.tasks.iter().collect();
        tasks.sort_by_key(|t| {
            std::cmp::Reverse(
                t.template
                    .priority_class_name
                    .as_deref()
                    .map(&priority_of)
                    .unwrap_or(0),
            )
        });

        let mut total = Resource::empty();
        let mut counted = 0u32;
        for task in tasks {
            for _ in 0..task.replicas {
                if counted >= self.spec.min_available {
                    return total;
                }
                total.add(&task.template.resources);
                counted += 1;
            }
        }
        total
    }
}

fn match_policies(policies: &[LifecyclePolicy], event: JobEvent) -> Option<JobAction> {
    if let Some(policy) = policies.iter().find(|p| p.event == event) {
        return Some(policy.action);
    }
    policies
        .iter()
        .find(|p| p.event == JobEvent::AnyEvent)
        .map(|p| p.action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_policies(policies: Vec<LifecyclePolicy>) -> Job {
        Job {
            uid: "u1".into(),
            namespace: "default".into(),
            name: "train".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: JobSpec {
                min_available: 2,
                scheduler_name: "gangway".into(),
                queue: None,
                tasks: vec![TaskSpec {
                    name: "worker".into(),
                    replicas: 3,
                    template: PodSpec {
                        resources: Resource::new(1000.0, 0.0),
                        ..Default::default()
                    },
                    labels: Default::default(),
                    policies: vec![],
                }],
                policies,
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

    #[test]
    fn pod_naming_contract() {
        assert_eq!(pod_name("train", "worker", 2), "train-worker-2");
    }

    #[test]
    fn policy_resolution_prefers_exact_event() {
        let job = job_with_policies(vec![
            LifecyclePolicy {
                event: JobEvent::AnyEvent,
                action: JobAction::AbortJob,
                timeout_seconds: None,
            },
            LifecyclePolicy {
                event: JobEvent::PodFailed,
                action: JobAction::RestartJob,
                timeout_seconds: None,
            },
        ]);
        assert_eq!(job.action_for(None, JobEvent::PodFailed), JobAction::RestartJob);
        assert_eq!(job.action_for(None, JobEvent::PodEvicted), JobAction::AbortJob);
    }

    #[test]
    fn default_action_is_sync() {
        let job = job_with_policies(vec![]);
        assert_eq!(job.action_for(None, JobEvent::OutOfSync), JobAction::SyncJob);
    }

    #[test]
    fn min_resources_counts_min_available_replicas() {
        let job = job_with_policies(vec![]);
        let min = job.min_resources(|_| 0);
        assert_eq!(min.milli_cpu, 2000.0);
    }

    #[test]
    fn default_queue_applies() {
        let job = job_with_policies(vec![]);
        assert_eq!(job.spec.queue(), "default");
    }
}
