//! Job controller lifecycle flows against a fake control plane
//!
//! The fake ports mirror pod creates/deletes back into the job cache the
//! way informers would, so each reconciliation observes the previous
//! one's effects.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use gangway_controller::{
    Controller, ControllerPorts, Job, JobAction, JobCache, JobEvent, JobPhase, JobSpec, JobStatus,
    JobStatusSink, LifecyclePolicy, Request, TaskSpec,
};
use gangway_core::{Pod, PodGroup, PodPhase, PodSpec, Resource};
use gangway_ports::{
    CompanionClient, EventRecorder, EventType, PodClient, PodGroupClient, PortResult,
};

/// Control plane stub: remembers pods and mirrors them into the cache.
#[derive(Default)]
struct FakeCluster {
    cache: Arc<JobCache>,
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

struct FakePodClient(Arc<FakeCluster>);

#[async_trait]
impl PodClient for FakePodClient {
    async fn create_pod(&self, pod: &Pod) -> PortResult<()> {
        self.0.created.lock().push(pod.name.clone());
        self.0.cache.add_pod(pod.clone()).ok();
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> PortResult<()> {
        self.0.deleted.lock().push(name.to_string());
        // informer echo: drop the pod from the cache
        let pod = Pod {
            uid: name.into(),
            namespace: namespace.into(),
            name: name.into(),
            labels: {
                let mut l = BTreeMap::new();
                let job = name.rsplitn(3, '-').nth(2).unwrap_or_default();
                l.insert(gangway_controller::cache::JOB_LABEL.to_string(), job.to_string());
                l
            },
            annotations: Default::default(),
            spec: PodSpec::default(),
            phase: PodPhase::Running,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        };
        self.0.cache.delete_pod(&pod).ok();
        Ok(())
    }
}

#[derive(Default)]
struct FakePodGroups;

#[async_trait]
impl PodGroupClient for FakePodGroups {
    async fn create_pod_group(&self, _pod_group: &PodGroup) -> PortResult<()> {
        Ok(())
    }

    async fn delete_pod_group(&self, _namespace: &str, _name: &str) -> PortResult<()> {
        Ok(())
    }

    async fn update_pod_group_status(&self, _pod_group: &PodGroup) -> PortResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeCompanions;

#[async_trait]
impl CompanionClient for FakeCompanions {
    async fn create_volume_claim(&self, _namespace: &str, _name: &str) -> PortResult<()> {
        Ok(())
    }

    async fn create_headless_service(&self, _namespace: &str, _name: &str) -> PortResult<()> {
        Ok(())
    }

    async fn delete_service(&self, _namespace: &str, _name: &str) -> PortResult<()> {
        Ok(())
    }

    async fn create_config_map(
        &self,
        _namespace: &str,
        _name: &str,
        _data: &BTreeMap<String, String>,
    ) -> PortResult<()> {
        Ok(())
    }

    async fn delete_config_map(&self, _namespace: &str, _name: &str) -> PortResult<()> {
        Ok(())
    }
}

/// Records every phase the controller writes, in order.
#[derive(Default, Clone)]
struct PhaseRecorder {
    phases: Arc<Mutex<Vec<(JobPhase, u32)>>>,
}

#[async_trait]
impl JobStatusSink for PhaseRecorder {
    async fn update_job_status(&self, job: &Job) -> PortResult<()> {
        self.phases
            .lock()
            .push((job.status.state.phase, job.status.version));
        Ok(())
    }
}

struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _object: &str, _event_type: EventType, _reason: &str, _message: &str) {}
}

fn restartable_job() -> Job {
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
                replicas: 2,
                template: PodSpec {
                    resources: Resource::new(1000.0, 0.0),
                    ..Default::default()
                },
                labels: Default::default(),
                policies: vec![],
            }],
            policies: vec![LifecyclePolicy {
                event: JobEvent::PodFailed,
                action: JobAction::RestartJob,
                timeout_seconds: None,
            }],
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

fn harness() -> (Arc<Controller>, Arc<FakeCluster>, PhaseRecorder) {
    let cache = Arc::new(JobCache::new());
    let cluster = Arc::new(FakeCluster {
        cache: Arc::clone(&cache),
        ..Default::default()
    });
    let phases = PhaseRecorder::default();
    let ports = ControllerPorts {
        pods: Arc::new(FakePodClient(Arc::clone(&cluster))),
        pod_groups: Arc::new(FakePodGroups),
        companions: Arc::new(FakeCompanions),
        status: Arc::new(phases.clone()),
        recorder: Arc::new(NoopRecorder),
    };
    let controller = Controller::new(cache, ports, 1);
    (controller, cluster, phases)
}

fn set_pod_phase(cluster: &FakeCluster, job: &Job, pod_name: &str, phase: PodPhase) {
    let info = cluster.cache.get(&job.namespace, &job.name).unwrap();
    for pods in info.pods.values() {
        if let Some(pod) = pods.get(pod_name) {
            let mut updated = pod.clone();
            updated.phase = phase;
            cluster.cache.add_pod(updated).unwrap();
            return;
        }
    }
    panic!("pod {pod_name} not found");
}

/// PodFailed with a RestartJob policy walks Pending -> Running ->
/// Restarting -> Pending, bumping the version once per restart.
#[tokio::test]
async fn restart_flow_walks_the_phase_machine() {
    let (controller, cluster, phases) = harness();
    let job = restartable_job();
    controller.cache().add_job(job.clone());

    // first sync creates the two task pods
    controller
        .process(&Request::new("default", "train", JobEvent::OutOfSync))
        .await
        .unwrap();
    assert_eq!(
        cluster.created.lock().clone(),
        vec!["train-worker-0".to_string(), "train-worker-1".to_string()]
    );

    // pods come up; the gang is running
    set_pod_phase(&cluster, &job, "train-worker-0", PodPhase::Running);
    set_pod_phase(&cluster, &job, "train-worker-1", PodPhase::Running);
    controller
        .process(&Request::new("default", "train", JobEvent::OutOfSync))
        .await
        .unwrap();

    // one pod fails; policy says restart the whole job
    set_pod_phase(&cluster, &job, "train-worker-1", PodPhase::Failed);
    controller
        .process(&Request::new("default", "train", JobEvent::PodFailed).with_task("worker"))
        .await
        .unwrap();

    // pods are gone; the drain check drops back to Pending
    controller
        .process(&Request::new("default", "train", JobEvent::OutOfSync))
        .await
        .unwrap();

    let recorded: Vec<JobPhase> = phases.phases.lock().iter().map(|(p, _)| *p).collect();
    assert_eq!(
        recorded,
        vec![
            JobPhase::Pending,
            JobPhase::Running,
            JobPhase::Restarting,
            JobPhase::Pending,
        ]
    );

    // exactly one version bump for the one Restarting entry
    let versions: Vec<u32> = phases.phases.lock().iter().map(|(_, v)| *v).collect();
    assert_eq!(versions, vec![0, 0, 1, 1]);

    let info = cluster.cache.get("default", "train").unwrap();
    assert_eq!(info.job.status.retry_count, 1);
}

/// Killing twice converges: the version bumps on the first kill only.
#[tokio::test]
async fn kill_job_is_idempotent() {
    let (controller, cluster, phases) = harness();
    let job = restartable_job();
    controller.cache().add_job(job.clone());

    controller
        .process(&Request::new("default", "train", JobEvent::OutOfSync))
        .await
        .unwrap();
    set_pod_phase(&cluster, &job, "train-worker-0", PodPhase::Running);
    set_pod_phase(&cluster, &job, "train-worker-1", PodPhase::Running);

    let terminate =
        Request::new("default", "train", JobEvent::CommandIssued).with_action(JobAction::TerminateJob);
    controller.process(&terminate).await.unwrap();
    let after_first = cluster.cache.get("default", "train").unwrap().job.status.version;

    controller.process(&terminate).await.unwrap();
    let after_second = cluster.cache.get("default", "train").unwrap().job.status.version;

    assert_eq!(after_first, 1);
    assert_eq!(after_second, after_first, "second kill must not bump the version");

    let last_phase = phases.phases.lock().last().map(|(p, _)| *p);
    assert_eq!(last_phase, Some(JobPhase::Terminated));

    assert_eq!(cluster.deleted.lock().len(), 2);
}

/// Superfluous pods beyond a task's replica count are deleted on sync.
#[tokio::test]
async fn sync_deletes_out_of_range_pods() {
    let (controller, cluster, _) = harness();
    let mut job = restartable_job();
    job.spec.tasks[0].replicas = 1;
    controller.cache().add_job(job.clone());

    // a leftover second pod from an earlier, larger spec
    let mut labels = BTreeMap::new();
    labels.insert(gangway_controller::cache::JOB_LABEL.to_string(), "train".into());
    labels.insert(gangway_controller::cache::TASK_LABEL.to_string(), "worker".into());
    cluster
        .cache
        .add_pod(Pod {
            uid: "stale".into(),
            namespace: "default".into(),
            name: "train-worker-7".into(),
            labels,
            annotations: Default::default(),
            spec: PodSpec::default(),
            phase: PodPhase::Running,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: Utc::now(),
        })
        .unwrap();

    controller
        .process(&Request::new("default", "train", JobEvent::OutOfSync))
        .await
        .unwrap();

    assert_eq!(cluster.created.lock().clone(), vec!["train-worker-0".to_string()]);
    assert_eq!(cluster.deleted.lock().clone(), vec!["train-worker-7".to_string()]);
}
