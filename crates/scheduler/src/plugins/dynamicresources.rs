//! Dynamicresources plugin: gate scalar-resource claims on node support
//!
//! A task asking for a named scalar resource (GPUs, NICs, FPGAs) can only
//! land on nodes whose allocatable actually carries that dimension; the
//! pre-predicate short-circuits tasks whose claims no node in the cluster
//! can satisfy.

use gangway_core::FitError;

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "dynamicresources";

pub fn new(_arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(DynamicResourcesPlugin)
}

struct DynamicResourcesPlugin;

impl Plugin for DynamicResourcesPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        ssn.add_pre_predicate_fn(
            PLUGIN_NAME,
            Box::new(|ssn, task| {
                for claim in task.resreq.scalars.keys() {
                    let supported = ssn
                        .nodes
                        .values()
                        .any(|node| node.allocatable.scalars.contains_key(claim));
                    if !supported {
                        return Err(FitError::new(
                            &task.name,
                            "",
                            "resource claim unsupported by the cluster",
                        ));
                    }
                }
                Ok(())
            }),
        );

        ssn.add_predicate_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, task, node| {
                for (claim, amount) in &task.resreq.scalars {
                    if *amount <= 0.0 {
                        continue;
                    }
                    if !node.allocatable.scalars.contains_key(claim) {
                        return Err(FitError::new(
                            &task.name,
                            &node.name,
                            "node does not expose the claimed resource",
                        ));
                    }
                }
                Ok(())
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{PluginSpec, SchedulerConf, SessionPorts, Tier};
    use crate::testing::SnapshotBuilder;
    use gangway_core::{JobId, Resource};

    #[test]
    fn claims_must_match_node_dimensions() {
        let snapshot = SnapshotBuilder::new()
            .queue("q1", 1)
            .node("plain", 4000.0)
            .job("j1", "q1", 1, &[("p1", 1000.0)])
            .build();

        let conf = SchedulerConf {
            actions: vec!["allocate".into()],
            tiers: vec![Tier {
                plugins: vec![PluginSpec::new("dynamicresources")],
            }],
        };
        let mut snapshot = snapshot;
        {
            let job = snapshot.jobs.get_mut(&JobId::from("default/j1")).unwrap();
            let uid = job.tasks.keys().next().unwrap().clone();
            let task = job.tasks.get_mut(&uid).unwrap();
            task.resreq = Resource::new(1000.0, 0.0).with_scalar("nvidia.com/gpu", 1000.0);
        }
        let ssn = Session::open(snapshot, &conf, SessionPorts::noop());

        let job = ssn.jobs.values().next().unwrap();
        let task = job.tasks.values().next().unwrap();
        let node = ssn.node("plain").unwrap();
        assert!(ssn.pre_predicate(task).is_err());
        assert!(ssn.predicate(task, node).is_err());
    }
}
