//! Priority plugin: order jobs and tasks by priority-class value

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "priority";

pub fn new(_arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(PriorityPlugin)
}

struct PriorityPlugin;

impl Plugin for PriorityPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        // higher priority first
        ssn.add_task_order_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, l, r| r.priority.cmp(&l.priority)),
        );

        ssn.add_job_order_fn(
            PLUGIN_NAME,
            Box::new(|_ssn, l, r| r.priority.cmp(&l.priority)),
        );

        // only strictly lower-priority tasks are fair game for preemption
        ssn.add_preemptable_fn(
            PLUGIN_NAME,
            Box::new(|ssn, preemptor, candidates| {
                let victims = candidates
                    .iter()
                    .filter(|uid| {
                        ssn.task(uid)
                            .map(|t| t.priority < preemptor.priority)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                Some(victims)
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{SchedulerConf, SessionPorts, Tier, PluginSpec};
    use crate::testing;

    #[test]
    fn job_order_prefers_higher_priority() {
        let conf = SchedulerConf {
            actions: vec!["allocate".into()],
            tiers: vec![Tier {
                plugins: vec![PluginSpec::new("priority")],
            }],
        };
        let mut snapshot = testing::SnapshotBuilder::new()
            .queue("q1", 1)
            .node("n1", 4000.0)
            .job("high", "q1", 1, &[("h1", 1000.0)])
            .job("low", "q1", 1, &[("l1", 1000.0)])
            .build();
        let high_id: gangway_core::JobId = "default/high".into();
        let low_id: gangway_core::JobId = "default/low".into();
        snapshot.jobs.get_mut(&high_id).unwrap().priority = 100;
        snapshot.jobs.get_mut(&low_id).unwrap().priority = 1;

        let ssn = Session::open(snapshot, &conf, SessionPorts::noop());
        let high = ssn.job(&high_id).unwrap();
        let low = ssn.job(&low_id).unwrap();
        assert_eq!(ssn.job_order(high, low), std::cmp::Ordering::Less);
    }
}
