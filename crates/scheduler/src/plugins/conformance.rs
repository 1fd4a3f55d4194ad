//! Conformance plugin: keep system-critical pods off every victim list

use gangway_core::TaskId;

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "conformance";

const CRITICAL_NAMESPACE: &str = "kube-system";

pub fn new(_arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(ConformancePlugin)
}

struct ConformancePlugin;

fn evictable(ssn: &Session, candidates: &[TaskId]) -> Option<Vec<TaskId>> {
    let victims = candidates
        .iter()
        .filter(|uid| {
            ssn.task(uid)
                .map(|task| {
                    let pc = task.pod.spec.priority_class_name.as_deref().unwrap_or("");
                    task.namespace != CRITICAL_NAMESPACE
                        && pc != "system-cluster-critical"
                        && pc != "system-node-critical"
                })
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    Some(victims)
}

impl Plugin for ConformancePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        ssn.add_preemptable_fn(
            PLUGIN_NAME,
            Box::new(|ssn, _preemptor, candidates| evictable(ssn, candidates)),
        );
        ssn.add_reclaimable_fn(
            PLUGIN_NAME,
            Box::new(|ssn, _reclaimer, candidates| evictable(ssn, candidates)),
        );
    }
}
