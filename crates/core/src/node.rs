//! Node projection with the idle/releasing bookkeeping the actions rely on

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::JobId;
use crate::pod::Taint;
use crate::resource::Resource;
use crate::task::{TaskId, TaskStatus};

/// Windowed utilization averages, fed by the cache and consumed by the
/// rescheduling strategies. Percentages of allocatable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub cpu_avg: f64,
    pub memory_avg: f64,
}

/// Kubelet-reported pressure conditions gating placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConditions {
    pub memory_pressure: bool,
    pub disk_pressure: bool,
    pub pid_pressure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub allocatable: Resource,
    pub capability: Resource,
    /// Free right now.
    pub idle: Resource,
    /// Charged to non-terminal pods.
    pub used: Resource,
    /// Held by tasks on their way out; free once evictions land.
    pub releasing: Resource,
    pub taints: Vec<Taint>,
    pub labels: std::collections::BTreeMap<String, String>,
    pub unschedulable: bool,
    pub conditions: NodeConditions,
    pub usage: NodeUsage,
    /// Container images already present on the node.
    pub images: std::collections::BTreeSet<String>,
    /// Tasks currently placed here, with their owning job.
    pub tasks: HashMap<TaskId, JobId>,
}

impl NodeInfo {
    pub fn new(name: &str, allocatable: Resource) -> Self {
        Self {
            name: name.to_string(),
            idle: allocatable.clone(),
            capability: allocatable.clone(),
            allocatable,
            used: Resource::empty(),
            releasing: Resource::empty(),
            taints: Vec::new(),
            labels: Default::default(),
            unschedulable: false,
            conditions: NodeConditions::default(),
            usage: NodeUsage::default(),
            images: Default::default(),
            tasks: HashMap::new(),
        }
    }

    /// Capacity that will be free once pending evictions land.
    pub fn future_idle(&self) -> Resource {
        let mut f = self.idle.clone();
        f.add(&self.releasing);
        f
    }

    /// Charge a placed task against this node.
    pub fn add_task(&mut self, uid: &TaskId, job: &JobId, resreq: &Resource, status: TaskStatus) -> Result<()> {
        match status {
            TaskStatus::Allocated | TaskStatus::Bound | TaskStatus::Running => {
                self.idle.sub(resreq)?;
                self.used.add(resreq);
            }
            TaskStatus::Pipelined => {
                self.releasing.sub(resreq)?;
            }
            TaskStatus::Releasing => {
                self.idle.sub(resreq)?;
                self.used.add(resreq);
                self.releasing.add(resreq);
            }
            _ => {}
        }
        self.tasks.insert(uid.clone(), job.clone());
        Ok(())
    }

    /// Reverse of `add_task` for the same status.
    pub fn remove_task(&mut self, uid: &TaskId, resreq: &Resource, status: TaskStatus) -> Result<()> {
        match status {
            TaskStatus::Allocated | TaskStatus::Bound | TaskStatus::Running => {
                self.idle.add(resreq);
                self.used.sub(resreq)?;
            }
            TaskStatus::Pipelined => {
                self.releasing.add(resreq);
            }
            TaskStatus::Releasing => {
                self.idle.add(resreq);
                self.used.sub(resreq)?;
                self.releasing.sub(resreq)?;
            }
            _ => {}
        }
        self.tasks.remove(uid);
        Ok(())
    }

    /// Flip an occupied task into Releasing: the task stays on the node
    /// and keeps charging `used`, but its share now counts as
    /// soon-to-be-free.
    pub fn mark_releasing(&mut self, resreq: &Resource) {
        self.releasing.add(resreq);
    }

    /// Reverse of `mark_releasing`, used when a statement is discarded.
    pub fn unmark_releasing(&mut self, resreq: &Resource) -> Result<()> {
        self.releasing.sub(resreq)?;
        Ok(())
    }

    pub fn pods(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_idle_includes_releasing() {
        let mut node = NodeInfo::new("n1", Resource::new(4000.0, 0.0));
        node.add_task(
            &"t1".into(),
            &"j1".into(),
            &Resource::new(3000.0, 0.0),
            TaskStatus::Running,
        )
        .unwrap();
        assert_eq!(node.idle.milli_cpu, 1000.0);

        node.releasing.add(&Resource::new(1000.0, 0.0));
        assert_eq!(node.future_idle().milli_cpu, 2000.0);
    }

    #[test]
    fn pipelined_task_consumes_releasing() {
        let mut node = NodeInfo::new("n1", Resource::new(4000.0, 0.0));
        node.idle = Resource::new(0.0, 0.0);
        node.releasing = Resource::new(2000.0, 0.0);

        node.add_task(
            &"t1".into(),
            &"j1".into(),
            &Resource::new(1000.0, 0.0),
            TaskStatus::Pipelined,
        )
        .unwrap();
        assert_eq!(node.releasing.milli_cpu, 1000.0);

        node.remove_task(&"t1".into(), &Resource::new(1000.0, 0.0), TaskStatus::Pipelined)
            .unwrap();
        assert_eq!(node.releasing.milli_cpu, 2000.0);
    }
}
