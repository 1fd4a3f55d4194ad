//! Binpack plugin: pack tasks onto the fullest nodes first
//!
//! The inverse of least-requested: score rises with post-placement
//! utilization, weighted per resource dimension so operators can bias
//! packing toward scarce resources.

use gangway_core::{NodeInfo, TaskInfo};

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "binpack";

const BINPACK_WEIGHT: &str = "binpack.weight";
const CPU_WEIGHT: &str = "binpack.cpu";
const MEMORY_WEIGHT: &str = "binpack.memory";

const MAX_SCORE: f64 = 100.0;

pub fn new(arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(BinpackPlugin {
        weight: arguments.get_f64(BINPACK_WEIGHT, 1.0),
        cpu_weight: arguments.get_f64(CPU_WEIGHT, 1.0),
        memory_weight: arguments.get_f64(MEMORY_WEIGHT, 1.0),
    })
}

struct BinpackPlugin {
    weight: f64,
    cpu_weight: f64,
    memory_weight: f64,
}

fn binpack_score(task: &TaskInfo, node: &NodeInfo, cpu_weight: f64, memory_weight: f64) -> f64 {
    let mut score = 0.0;
    let mut weight_sum = 0.0;
    if cpu_weight > 0.0 && node.allocatable.milli_cpu > 0.0 {
        let used = (node.used.milli_cpu + task.resreq.milli_cpu) / node.allocatable.milli_cpu;
        if used <= 1.0 {
            score += cpu_weight * used * MAX_SCORE;
        }
        weight_sum += cpu_weight;
    }
    if memory_weight > 0.0 && node.allocatable.memory > 0.0 {
        let used = (node.used.memory + task.resreq.memory) / node.allocatable.memory;
        if used <= 1.0 {
            score += memory_weight * used * MAX_SCORE;
        }
        weight_sum += memory_weight;
    }
    if weight_sum == 0.0 {
        return 0.0;
    }
    score / weight_sum
}

impl Plugin for BinpackPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        if self.weight <= 0.0 {
            return;
        }
        let weight = self.weight;
        let cpu_weight = self.cpu_weight;
        let memory_weight = self.memory_weight;
        ssn.add_node_order_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, task, node| {
                Ok(weight * binpack_score(task, node, cpu_weight, memory_weight))
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_core::Resource;

    #[test]
    fn fuller_node_scores_higher() {
        let pod = gangway_core::Pod {
            uid: "t1".into(),
            namespace: "default".into(),
            name: "t1".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: gangway_core::PodSpec {
                resources: Resource::new(1000.0, 0.0),
                ..Default::default()
            },
            phase: gangway_core::PodPhase::Pending,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: chrono::Utc::now(),
        };
        let task = TaskInfo::from_pod("j1".into(), &pod, true, 0);

        let empty = NodeInfo::new("empty", Resource::new(8000.0, 0.0));
        let mut busy = NodeInfo::new("busy", Resource::new(8000.0, 0.0));
        busy.used = Resource::new(6000.0, 0.0);

        assert!(
            binpack_score(&task, &busy, 1.0, 1.0) > binpack_score(&task, &empty, 1.0, 1.0)
        );
    }
}
