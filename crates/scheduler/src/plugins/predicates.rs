//! Predicates plugin: the node-level gates every placement must pass
//!
//! Composes the usual checks: schedulability, pressure conditions, node
//! selector, taints and tolerations, host ports, and inter-pod
//! (anti-)affinity over the pods already on the node.

use gangway_core::{FitError, NodeInfo, TaintEffect, TaskInfo};

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "predicates";

pub fn new(arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(PredicatesPlugin { arguments })
}

struct PredicatesPlugin {
    arguments: Arguments,
}

fn check_node_ready(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitError> {
    if node.unschedulable {
        return Err(FitError::new(&task.name, &node.name, "node unschedulable"));
    }
    if node.conditions.memory_pressure {
        return Err(FitError::new(&task.name, &node.name, "node under memory pressure"));
    }
    if node.conditions.disk_pressure {
        return Err(FitError::new(&task.name, &node.name, "node under disk pressure"));
    }
    if node.conditions.pid_pressure {
        return Err(FitError::new(&task.name, &node.name, "node under pid pressure"));
    }
    Ok(())
}

fn check_node_selector(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitError> {
    for (key, value) in &task.pod.spec.node_selector {
        if node.labels.get(key) != Some(value) {
            return Err(FitError::new(
                &task.name,
                &node.name,
                "node selector mismatch",
            ));
        }
    }
    Ok(())
}

fn check_taints(task: &TaskInfo, node: &NodeInfo) -> Result<(), FitError> {
    for taint in &node.taints {
        if taint.effect == TaintEffect::PreferNoSchedule {
            continue;
        }
        let tolerated = task
            .pod
            .spec
            .tolerations
            .iter()
            .any(|toleration| toleration.tolerates(taint));
        if !tolerated {
            return Err(FitError::new(
                &task.name,
                &node.name,
                "untolerated taint",
            ));
        }
    }
    Ok(())
}

fn check_host_ports(ssn: &Session, task: &TaskInfo, node: &NodeInfo) -> Result<(), FitError> {
    if task.pod.spec.host_ports.is_empty() {
        return Ok(());
    }
    for uid in node.tasks.keys() {
        let Some(placed) = ssn.task(uid) else {
            continue;
        };
        for port in &placed.pod.spec.host_ports {
            if task.pod.spec.host_ports.contains(port) {
                return Err(FitError::new(
                    &task.name,
                    &node.name,
                    "host port already in use",
                ));
            }
        }
    }
    Ok(())
}

fn check_pod_affinity(ssn: &Session, task: &TaskInfo, node: &NodeInfo) -> Result<(), FitError> {
    if task.pod.spec.affinity.is_empty() {
        return Ok(());
    }
    for term in &task.pod.spec.affinity {
        let mut matched = false;
        for uid in node.tasks.keys() {
            if uid == &task.uid {
                continue;
            }
            let Some(placed) = ssn.task(uid) else {
                continue;
            };
            if term.matches(&placed.pod.labels) {
                matched = true;
                break;
            }
        }
        if term.anti && matched {
            return Err(FitError::new(
                &task.name,
                &node.name,
                "anti-affinity conflict",
            ));
        }
        if !term.anti && !matched {
            return Err(FitError::new(
                &task.name,
                &node.name,
                "affinity unsatisfied",
            ));
        }
    }
    Ok(())
}

impl Plugin for PredicatesPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        let enable_affinity = self.arguments.get_bool("predicate.PodAffinityEnable", true);
        let enable_ports = self.arguments.get_bool("predicate.HostPortsEnable", true);

        ssn.add_predicate_fn(
            PLUGIN_NAME,
            Box::new(move |ssn, task, node| {
                check_node_ready(task, node)?;
                check_node_selector(task, node)?;
                check_taints(task, node)?;
                if enable_ports {
                    check_host_ports(ssn, task, node)?;
                }
                if enable_affinity {
                    check_pod_affinity(ssn, task, node)?;
                }
                Ok(())
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_core::{Resource, Taint, Toleration, TolerationOperator};

    fn task() -> TaskInfo {
        let pod = gangway_core::Pod {
            uid: "t1".into(),
            namespace: "default".into(),
            name: "t1".into(),
            labels: Default::default(),
            annotations: Default::default(),
            spec: Default::default(),
            phase: gangway_core::PodPhase::Pending,
            node_name: None,
            deletion_timestamp: None,
            creation_timestamp: chrono::Utc::now(),
        };
        TaskInfo::from_pod("j1".into(), &pod, true, 0)
    }

    #[test]
    fn unschedulable_node_is_rejected() {
        let mut node = NodeInfo::new("n1", Resource::new(1000.0, 0.0));
        node.unschedulable = true;
        assert!(check_node_ready(&task(), &node).is_err());
    }

    #[test]
    fn selector_must_match_labels() {
        let mut node = NodeInfo::new("n1", Resource::new(1000.0, 0.0));
        node.labels.insert("zone".into(), "a".into());

        let mut t = task();
        t.pod.spec.node_selector.insert("zone".into(), "b".into());
        assert!(check_node_selector(&t, &node).is_err());

        t.pod.spec.node_selector.insert("zone".into(), "a".into());
        assert!(check_node_selector(&t, &node).is_ok());
    }

    #[test]
    fn taints_require_tolerations() {
        let mut node = NodeInfo::new("n1", Resource::new(1000.0, 0.0));
        node.taints.push(Taint {
            key: "dedicated".into(),
            value: "batch".into(),
            effect: TaintEffect::NoSchedule,
        });

        let mut t = task();
        assert!(check_taints(&t, &node).is_err());

        t.pod.spec.tolerations.push(Toleration {
            key: "dedicated".into(),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect: None,
        });
        assert!(check_taints(&t, &node).is_ok());
    }

    #[test]
    fn prefer_no_schedule_taints_do_not_gate() {
        let mut node = NodeInfo::new("n1", Resource::new(1000.0, 0.0));
        node.taints.push(Taint {
            key: "dedicated".into(),
            value: "batch".into(),
            effect: TaintEffect::PreferNoSchedule,
        });
        assert!(check_taints(&task(), &node).is_ok());
    }
}
