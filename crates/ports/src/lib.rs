//! Ports: the named interfaces gangway drives the cluster through
//!
//! The core never owns pod binding or deletion; it issues requests
//! through these traits and an adapter behind each one talks to the real
//! control plane. Every call accepts cancellation via the caller's
//! runtime context and must be idempotent where documented.

use async_trait::async_trait;
use thiserror::Error;

use gangway_core::{Pod, PodGroup, PodVolumes, TaskInfo};

#[derive(Error, Debug, Clone)]
pub enum PortError {
    #[error("cluster api rejected the request: {0}")]
    Rejected(String),

    #[error("transient cluster api failure: {0}")]
    Transient(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),
}

impl PortError {
    /// Errors the callers swallow when the outcome they wanted already
    /// holds.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, PortError::AlreadyExists(_))
    }
}

pub type PortResult<T> = std::result::Result<T, PortError>;

/// Issues bind requests to the kubelet side. Must be idempotent per
/// (pod, node).
#[async_trait]
pub trait Binder: Send + Sync {
    async fn bind(
        &self,
        task: &TaskInfo,
        node_name: &str,
        pod_volumes: Option<&PodVolumes>,
    ) -> PortResult<()>;
}

/// Requests graceful termination of a task's pod.
#[async_trait]
pub trait Evictor: Send + Sync {
    async fn evict(&self, task: &TaskInfo, reason: &str) -> PortResult<()>;
}

/// Pod create/delete, used by the job controller.
#[async_trait]
pub trait PodClient: Send + Sync {
    async fn create_pod(&self, pod: &Pod) -> PortResult<()>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> PortResult<()>;
}

/// PodGroup lifecycle and status writes.
#[async_trait]
pub trait PodGroupClient: Send + Sync {
    async fn create_pod_group(&self, pod_group: &PodGroup) -> PortResult<()>;
    async fn delete_pod_group(&self, namespace: &str, name: &str) -> PortResult<()>;
    async fn update_pod_group_status(&self, pod_group: &PodGroup) -> PortResult<()>;
}

/// Companion objects the job controller owns besides pods.
#[async_trait]
pub trait CompanionClient: Send + Sync {
    async fn create_volume_claim(&self, namespace: &str, name: &str) -> PortResult<()>;
    async fn create_headless_service(&self, namespace: &str, name: &str) -> PortResult<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> PortResult<()>;
    async fn create_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: &std::collections::BTreeMap<String, String>,
    ) -> PortResult<()>;
    async fn delete_config_map(&self, namespace: &str, name: &str) -> PortResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Records human-readable events against cluster objects.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &str, event_type: EventType, reason: &str, message: &str);
}

/// Recorder that drops everything, for wiring tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct NullRecorder;

impl EventRecorder for NullRecorder {
    fn record(&self, _object: &str, _event_type: EventType, _reason: &str, _message: &str) {}
}

/// Binder that accepts everything without side effects.
#[derive(Debug, Default, Clone)]
pub struct NullBinder;

#[async_trait]
impl Binder for NullBinder {
    async fn bind(
        &self,
        _task: &TaskInfo,
        _node_name: &str,
        _pod_volumes: Option<&PodVolumes>,
    ) -> PortResult<()> {
        Ok(())
    }
}

/// Evictor that accepts everything without side effects.
#[derive(Debug, Default, Clone)]
pub struct NullEvictor;

#[async_trait]
impl Evictor for NullEvictor {
    async fn evict(&self, _task: &TaskInfo, _reason: &str) -> PortResult<()> {
        Ok(())
    }
}

/// PodGroup writer that accepts everything without side effects.
#[derive(Debug, Default, Clone)]
pub struct NullPodGroupClient;

#[async_trait]
impl PodGroupClient for NullPodGroupClient {
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
