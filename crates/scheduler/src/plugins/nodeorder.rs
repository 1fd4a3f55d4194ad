//! Nodeorder plugin: the weighted sum of node scorers
//!
//! Each scorer is worth up to 100 points and is multiplied by its
//! configured weight; a weight of zero disables the scorer entirely.

use gangway_core::{NodeInfo, TaintEffect, TaskInfo};

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "nodeorder";

const LEAST_REQUESTED_WEIGHT: &str = "leastrequested.weight";
const MOST_REQUESTED_WEIGHT: &str = "mostrequested.weight";
const BALANCED_RESOURCE_WEIGHT: &str = "balancedresource.weight";
const NODE_AFFINITY_WEIGHT: &str = "nodeaffinity.weight";
const TAINT_TOLERATION_WEIGHT: &str = "tainttoleration.weight";
const IMAGE_LOCALITY_WEIGHT: &str = "imagelocality.weight";
const POD_SPREAD_WEIGHT: &str = "podtopologyspread.weight";

const MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
struct Weights {
    least_requested: f64,
    most_requested: f64,
    balanced_resource: f64,
    node_affinity: f64,
    taint_toleration: f64,
    image_locality: f64,
    pod_spread: f64,
}

impl Weights {
    fn from_arguments(args: &Arguments) -> Self {
        Self {
            least_requested: args.get_f64(LEAST_REQUESTED_WEIGHT, 1.0),
            most_requested: args.get_f64(MOST_REQUESTED_WEIGHT, 0.0),
            balanced_resource: args.get_f64(BALANCED_RESOURCE_WEIGHT, 1.0),
            node_affinity: args.get_f64(NODE_AFFINITY_WEIGHT, 1.0),
            taint_toleration: args.get_f64(TAINT_TOLERATION_WEIGHT, 1.0),
            image_locality: args.get_f64(IMAGE_LOCALITY_WEIGHT, 1.0),
            pod_spread: args.get_f64(POD_SPREAD_WEIGHT, 2.0),
        }
    }
}

pub fn new(arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(NodeOrderPlugin {
        weights: Weights::from_arguments(&arguments),
    })
}

struct NodeOrderPlugin {
    weights: Weights,
}

/// Fraction of the node each dimension would be at after placing the
/// task, averaged over cpu and memory.
fn requested_fractions(task: &TaskInfo, node: &NodeInfo) -> (f64, f64) {
    let cpu_cap = node.allocatable.milli_cpu.max(1.0);
    let mem_cap = node.allocatable.memory.max(1.0);
    let cpu = ((node.used.milli_cpu + task.resreq.milli_cpu) / cpu_cap).min(1.0);
    let mem = ((node.used.memory + task.resreq.memory) / mem_cap).min(1.0);
    (cpu, mem)
}

fn least_requested_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let (cpu, mem) = requested_fractions(task, node);
    ((1.0 - cpu) + (1.0 - mem)) / 2.0 * MAX_SCORE
}

fn most_requested_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let (cpu, mem) = requested_fractions(task, node);
    (cpu + mem) / 2.0 * MAX_SCORE
}

/// Prefer nodes where cpu and memory utilization stay close to each
/// other after placement.
fn balanced_resource_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let (cpu, mem) = requested_fractions(task, node);
    (1.0 - (cpu - mem).abs()) * MAX_SCORE
}

/// Each matching preferred-selector label is worth an equal slice.
fn node_affinity_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let preferred = &task.pod.spec.preferred_node_selector;
    if preferred.is_empty() {
        return 0.0;
    }
    let matched = preferred
        .iter()
        .filter(|(k, v)| node.labels.get(*k) == Some(*v))
        .count();
    matched as f64 / preferred.len() as f64 * MAX_SCORE
}

/// Penalize PreferNoSchedule taints the task does not tolerate.
fn taint_toleration_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let soft: Vec<_> = node
        .taints
        .iter()
        .filter(|t| t.effect == TaintEffect::PreferNoSchedule)
        .collect();
    if soft.is_empty() {
        return MAX_SCORE;
    }
    let tolerated = soft
        .iter()
        .filter(|taint| {
            task.pod
                .spec
                .tolerations
                .iter()
                .any(|tol| tol.tolerates(taint))
        })
        .count();
    tolerated as f64 / soft.len() as f64 * MAX_SCORE
}

fn image_locality_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let images = &task.pod.spec.images;
    if images.is_empty() {
        return 0.0;
    }
    let present = images.iter().filter(|i| node.images.contains(*i)).count();
    present as f64 / images.len() as f64 * MAX_SCORE
}

/// Spread siblings of one job: fewer of the job's tasks on the node, the
/// better.
fn pod_spread_score(task: &TaskInfo, node: &NodeInfo) -> f64 {
    let siblings = node.tasks.values().filter(|job| **job == task.job).count();
    MAX_SCORE / (1.0 + siblings as f64)
}

impl Plugin for NodeOrderPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        let w = self.weights;
        ssn.add_node_order_fn(
            PLUGIN_NAME,
            Box::new(move |_ssn, task, node| {
                let mut score = 0.0;
                if w.least_requested > 0.0 {
                    score += w.least_requested * least_requested_score(task, node);
                }
                if w.most_requested > 0.0 {
                    score += w.most_requested * most_requested_score(task, node);
                }
                if w.balanced_resource > 0.0 {
                    score += w.balanced_resource * balanced_resource_score(task, node);
                }
                if w.node_affinity > 0.0 {
                    score += w.node_affinity * node_affinity_score(task, node);
                }
                if w.taint_toleration > 0.0 {
                    score += w.taint_toleration * taint_toleration_score(task, node);
                }
                if w.image_locality > 0.0 {
                    score += w.image_locality * image_locality_score(task, node);
                }
                if w.pod_spread > 0.0 {
                    score += w.pod_spread * pod_spread_score(task, node);
                }
                Ok(score)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_core::Resource;

    fn task(milli_cpu: f64, memory: f64) -> TaskInfo {
        let pod = gangway_core::Pod {
            uid: "t1".into(),
            namespace: "default".into(),
            name: "t1".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: gangway_core::PodSpec {
                resources: Resource::new(milli_cpu, memory),
                ..Default::default()
            },
            phase: gangway_core::PodPhase::Pending,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: chrono::Utc::now(),
        };
        TaskInfo::from_pod("j1".into(), &pod, true, 0)
    }

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    #[test]
    fn least_requested_prefers_emptier_node() {
        let t = task(1000.0, GIB);
        let empty = NodeInfo::new("empty", Resource::new(8000.0, 8.0 * GIB));
        let mut busy = NodeInfo::new("busy", Resource::new(8000.0, 8.0 * GIB));
        busy.used = Resource::new(6000.0, 6.0 * GIB);

        assert!(least_requested_score(&t, &empty) > least_requested_score(&t, &busy));
        assert!(most_requested_score(&t, &busy) > most_requested_score(&t, &empty));
    }

    #[test]
    fn balanced_resource_penalizes_skew() {
        let skewed = task(4000.0, 0.0);
        let node = NodeInfo::new("n1", Resource::new(8000.0, 8.0 * GIB));
        let balanced = task(4000.0, 4.0 * GIB);
        assert!(
            balanced_resource_score(&balanced, &node) > balanced_resource_score(&skewed, &node)
        );
    }

    #[test]
    fn zero_weight_disables_scorer() {
        let mut args = Arguments::new();
        args.insert(LEAST_REQUESTED_WEIGHT, serde_yaml::Value::from(0));
        args.insert(BALANCED_RESOURCE_WEIGHT, serde_yaml::Value::from(0));
        args.insert(TAINT_TOLERATION_WEIGHT, serde_yaml::Value::from(0));
        args.insert(IMAGE_LOCALITY_WEIGHT, serde_yaml::Value::from(0));
        args.insert(POD_SPREAD_WEIGHT, serde_yaml::Value::from(0));
        args.insert(NODE_AFFINITY_WEIGHT, serde_yaml::Value::from(0));
        let w = Weights::from_arguments(&args);
        assert_eq!(w.least_requested, 0.0);
        assert_eq!(w.pod_spread, 0.0);
        // most-requested defaults off
        assert_eq!(w.most_requested, 0.0);
    }
}
