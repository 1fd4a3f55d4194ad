//! Network-topology-aware plugin: keep a gang low in the hypernode tree
//!
//! Scores candidate hypernodes so the job's lowest-common-ancestor stays
//! on as low a tier as possible. A job with nothing placed yet sees the
//! base score everywhere.

use std::collections::HashMap;

use gangway_core::JobInfo;

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "networktopologyaware";

const BASE_SCORE: f64 = 1.0;

pub fn new(_arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(NetworkTopologyAwarePlugin)
}

struct NetworkTopologyAwarePlugin;

fn topology_score(ssn: &Session, job: &JobInfo, hypernode: &str) -> f64 {
    let tree = &ssn.hypernodes;
    let sum_tier: i32 = tree.tiers.iter().sum();
    if sum_tier == 0 {
        return 0.0;
    }
    match &job.lca_hyper_node {
        // nothing placed yet: every candidate is equally fine
        None => BASE_SCORE,
        Some(lca) => {
            let Some((root, tier)) = tree.find_out_root(hypernode, Some(lca)) else {
                return 0.0;
            };
            if &root == hypernode {
                return BASE_SCORE;
            }
            1.0 - tier as f64 / sum_tier as f64
        }
    }
}

impl Plugin for NetworkTopologyAwarePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        if ssn.hypernodes.is_empty() {
            return;
        }
        ssn.add_hyper_node_order_fn(
            PLUGIN_NAME,
            Box::new(|ssn, job| {
                let mut scores = HashMap::new();
                for tier_nodes in ssn.hypernodes.by_tier.values() {
                    for name in tier_nodes {
                        scores.insert(name.clone(), topology_score(ssn, job, name));
                    }
                }
                Ok(scores)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{PluginSpec, SchedulerConf, SessionPorts, Tier};
    use crate::testing::SnapshotBuilder;
    use gangway_core::HyperNodeTree;

    #[test]
    fn placed_job_prefers_its_own_rack() {
        let mut tree = HyperNodeTree::default();
        tree.add("rack-a", 1, ["n1".into()]);
        tree.add("rack-b", 1, ["n2".into()]);
        tree.add("spine", 2, ["n1".into(), "n2".into()]);

        let builder = SnapshotBuilder::new()
            .queue("q1", 1)
            .node("n1", 4000.0)
            .node("n2", 4000.0)
            .job("j1", "q1", 1, &[("p1", 1000.0)]);
        builder.cache().set_hypernodes(tree);
        let mut snapshot = builder.build();
        let job_id: gangway_core::JobId = "default/j1".into();
        snapshot.jobs.get_mut(&job_id).unwrap().lca_hyper_node = Some("rack-a".into());

        let conf = SchedulerConf {
            actions: vec!["allocate".into()],
            tiers: vec![Tier {
                plugins: vec![PluginSpec::new("networktopologyaware")],
            }],
        };
        let ssn = Session::open(snapshot, &conf, SessionPorts::noop());
        let job = ssn.job(&job_id).unwrap();
        let scores = ssn.hyper_node_order(job);

        // staying in rack-a keeps the root where it is; rack-b drags the
        // gang up to the spine
        assert!(scores["rack-a"] > scores["rack-b"]);
    }
}
