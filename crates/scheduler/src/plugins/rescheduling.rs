//! Rescheduling plugin: pick victims from over-utilized nodes
//!
//! Strategies run off the windowed node utilization averages and are
//! rate-limited per strategy so a hot cluster is not churned every cycle.
//! Victims are only named; the shuffle action evicts them and a later
//! cycle re-places the workload.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use gangway_core::TaskId;

use crate::framework::{Arguments, Plugin, Session};

pub const PLUGIN_NAME: &str = "rescheduling";

const STRATEGY_KEY: &str = "strategy";
const INTERVAL_KEY: &str = "interval.seconds";
const CPU_LOW_KEY: &str = "thresholds.cpu";
const MEM_LOW_KEY: &str = "thresholds.memory";
const CPU_HIGH_KEY: &str = "targetThresholds.cpu";
const MEM_HIGH_KEY: &str = "targetThresholds.memory";

/// Last firing per strategy; survives sessions so the interval actually
/// rate-limits.
fn last_run() -> &'static Mutex<HashMap<String, Instant>> {
    static LAST_RUN: OnceLock<Mutex<HashMap<String, Instant>>> = OnceLock::new();
    LAST_RUN.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone)]
struct LowNodeUtilizationConf {
    cpu_low: f64,
    memory_low: f64,
    cpu_high: f64,
    memory_high: f64,
}

impl LowNodeUtilizationConf {
    fn from_arguments(args: &Arguments) -> Self {
        Self {
            cpu_low: args.get_f64(CPU_LOW_KEY, 20.0),
            memory_low: args.get_f64(MEM_LOW_KEY, 20.0),
            cpu_high: args.get_f64(CPU_HIGH_KEY, 80.0),
            memory_high: args.get_f64(MEM_HIGH_KEY, 80.0),
        }
    }
}

pub fn new(arguments: Arguments) -> Box<dyn Plugin> {
    Box::new(ReschedulingPlugin { arguments })
}

struct ReschedulingPlugin {
    arguments: Arguments,
}

/// Movable tasks on nodes above the target thresholds, provided some node
/// sits below the low thresholds to take the load.
fn low_node_utilization_victims(
    ssn: &Session,
    candidates: &[TaskId],
    conf: &LowNodeUtilizationConf,
) -> Vec<TaskId> {
    let mut low_nodes = 0usize;
    let mut high_nodes: Vec<&str> = Vec::new();
    for node in ssn.nodes.values() {
        let usage = &node.usage;
        if usage.cpu_avg < conf.cpu_low && usage.memory_avg < conf.memory_low {
            low_nodes += 1;
        } else if usage.cpu_avg > conf.cpu_high || usage.memory_avg > conf.memory_high {
            high_nodes.push(&node.name);
        }
    }
    if low_nodes == 0 || high_nodes.is_empty() {
        debug!(low_nodes, high = high_nodes.len(), "utilization spread does not warrant rebalancing");
        return Vec::new();
    }

    let mut victims = Vec::new();
    for uid in candidates {
        let Some(task) = ssn.task(uid) else {
            continue;
        };
        if !task.preemptable || !task.status.is_occupied() {
            continue;
        }
        let Some(node) = task.node_name.as_deref() else {
            continue;
        };
        if high_nodes.contains(&node) {
            victims.push(uid.clone());
        }
    }
    info!(victims = victims.len(), "low-node-utilization selected victims");
    victims
}

impl Plugin for ReschedulingPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn on_session_open(&mut self, ssn: &mut Session) {
        let strategy = self.arguments.get_string(STRATEGY_KEY, "lowNodeUtilization");
        let interval = Duration::from_secs(self.arguments.get_i64(INTERVAL_KEY, 300).max(0) as u64);

        {
            let mut runs = last_run().lock();
            if let Some(last) = runs.get(&strategy) {
                if last.elapsed() < interval {
                    debug!(%strategy, "strategy inside its cool-down, skipping this session");
                    return;
                }
            }
            runs.insert(strategy.clone(), Instant::now());
        }

        if strategy != "lowNodeUtilization" {
            tracing::warn!(%strategy, "unknown rescheduling strategy");
            return;
        }
        let conf = LowNodeUtilizationConf::from_arguments(&self.arguments);
        ssn.add_victim_tasks_fns(
            PLUGIN_NAME,
            vec![Box::new(move |ssn, candidates| {
                low_node_utilization_victims(ssn, candidates, &conf)
            })],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{PluginSpec, SchedulerConf, SessionPorts, Tier};
    use crate::testing::SnapshotBuilder;
    use gangway_core::NodeUsage;

    #[test]
    fn victims_come_from_hot_nodes_only() {
        let builder = SnapshotBuilder::new()
            .queue("q1", 1)
            .node("hot", 4000.0)
            .node("cold", 4000.0)
            .pod_group("j1", "q1", 1)
            .running_task("j1", "busy", 1000.0, "hot", true)
            .running_task("j1", "calm", 1000.0, "cold", true);
        builder.cache().update_node_usage(
            "hot",
            NodeUsage {
                cpu_avg: 95.0,
                memory_avg: 40.0,
            },
        );
        builder.cache().update_node_usage(
            "cold",
            NodeUsage {
                cpu_avg: 5.0,
                memory_avg: 5.0,
            },
        );
        let snapshot = builder.build();

        let conf = SchedulerConf {
            actions: vec!["shuffle".into()],
            tiers: vec![Tier {
                plugins: vec![PluginSpec::new("rescheduling")],
            }],
        };
        let ssn = Session::open(snapshot, &conf, SessionPorts::noop());

        let all_tasks: Vec<TaskId> = ssn
            .jobs
            .values()
            .flat_map(|j| j.tasks.keys().cloned())
            .collect();
        let victims = ssn.victim_tasks(&all_tasks);
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].as_str(), "busy");
    }
}
