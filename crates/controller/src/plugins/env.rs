//! env plugin: inject the task replica index into every pod

use gangway_core::Pod;

use crate::apis::Job;
use crate::error::Result;

use super::JobPlugin;

pub const TASK_INDEX_ENV: &str = "GANGWAY_TASK_INDEX";

pub struct EnvPlugin;

impl JobPlugin for EnvPlugin {
    fn name(&self) -> &str {
        "env"
    }

    fn on_pod_create(&self, pod: &mut Pod, _job: &Job) -> Result<()> {
        // index is the trailing segment of `{job}-{task}-{index}`
        if let Some(index) = pod.name.rsplit('-').next() {
            pod.spec
                .env
                .insert(TASK_INDEX_ENV.to_string(), index.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{JobSpec, JobStatus};
    use chrono::Utc;

    #[test]
    fn index_is_injected() {
        let job = Job {
            uid: "u".into(),
            namespace: "default".into(),
            name: "train".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: JobSpec {
                min_available: 1,
                scheduler_name: String::new(),
                queue: None,
                tasks: vec![],
                policies: vec![],
                plugins: Default::default(),
                max_retry: 0,
                input: None,
                output: None,
                priority_class_name: None,
            },
            status: JobStatus::default(),
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        };
        let mut pod = Pod {
            uid: "p".into(),
            namespace: "default".into(),
            name: "train-worker-7".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: Default::default(),
            phase: gangway_core::PodPhase::Pending,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        };
        EnvPlugin.on_pod_create(&mut pod, &job).unwrap();
        assert_eq!(pod.spec.env[TASK_INDEX_ENV], "7");
    }
}
