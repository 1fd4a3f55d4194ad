//! Scheduling framework: session, tiered plugins, transactional statements

pub mod config;
pub mod registry;
pub mod session;
pub mod session_plugins;
pub mod statement;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use gangway_core::{FitError, JobId, JobInfo, NodeInfo, QueueInfo, Result, TaskId, TaskInfo};

pub use config::{is_enabled, PluginSpec, SchedulerConf, Tier};
pub use registry::{action_names, new_action, plugin_builders, PluginBuilder};
pub use session::{Event, EventHandler, Session, SessionPorts};
pub use statement::Statement;

/// Outcome of a voting extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Permit,
    Abstain,
    Reject,
}

/// Outcome of job validation; a failed result carries the condition
/// persisted on the job.
#[derive(Debug, Clone)]
pub struct ValidateResult {
    pub pass: bool,
    pub reason: String,
    pub message: String,
}

// Extension point signatures. Every function receives the session so
// plugin closures stay free of self-referential captures; plugin-private
// state travels inside the closure behind an Arc.
pub type CompareJobFn = Box<dyn Fn(&Session, &JobInfo, &JobInfo) -> Ordering + Send + Sync>;
pub type CompareTaskFn = Box<dyn Fn(&Session, &TaskInfo, &TaskInfo) -> Ordering + Send + Sync>;
pub type CompareQueueFn = Box<dyn Fn(&Session, &QueueInfo, &QueueInfo) -> Ordering + Send + Sync>;
pub type CompareNamespaceFn = Box<dyn Fn(&Session, &str, &str) -> Ordering + Send + Sync>;
pub type CompareClusterFn = Box<dyn Fn(&Session, &str, &str) -> Ordering + Send + Sync>;
/// Victim queue comparison carries the preemptor's queue as the third
/// argument.
pub type VictimCompareQueueFn =
    Box<dyn Fn(&Session, &QueueInfo, &QueueInfo, &QueueInfo) -> Ordering + Send + Sync>;
/// Returns `None` to abstain, `Some(vec![])` to veto the tier, or the
/// candidate victims.
pub type EvictableFn =
    Box<dyn Fn(&Session, &TaskInfo, &[TaskId]) -> Option<Vec<TaskId>> + Send + Sync>;
pub type ValidateJobFn = Box<dyn Fn(&Session, &JobInfo) -> bool + Send + Sync>;
pub type VoteJobFn = Box<dyn Fn(&Session, &JobInfo) -> Vote + Send + Sync>;
pub type JobEnqueuedFn = Box<dyn Fn(&Session, &JobInfo) + Send + Sync>;
pub type JobValidFn = Box<dyn Fn(&Session, &JobInfo) -> Option<ValidateResult> + Send + Sync>;
pub type OverusedFn = Box<dyn Fn(&Session, &QueueInfo) -> bool + Send + Sync>;
pub type PreemptiveFn = Box<dyn Fn(&Session, &QueueInfo, &TaskInfo) -> bool + Send + Sync>;
pub type AllocatableFn = Box<dyn Fn(&Session, &QueueInfo, &TaskInfo) -> bool + Send + Sync>;
pub type PredicateFn =
    Box<dyn Fn(&Session, &TaskInfo, &NodeInfo) -> std::result::Result<(), FitError> + Send + Sync>;
pub type PrePredicateFn =
    Box<dyn Fn(&Session, &TaskInfo) -> std::result::Result<(), FitError> + Send + Sync>;
pub type NodeOrderFn = Box<dyn Fn(&Session, &TaskInfo, &NodeInfo) -> Result<f64> + Send + Sync>;
pub type BatchNodeOrderFn =
    Box<dyn Fn(&Session, &TaskInfo, &[&NodeInfo]) -> Result<HashMap<String, f64>> + Send + Sync>;
pub type NodeMapFn = Box<dyn Fn(&Session, &TaskInfo, &NodeInfo) -> Result<f64> + Send + Sync>;
pub type NodeReduceFn =
    Box<dyn Fn(&Session, &TaskInfo, &mut HashMap<String, f64>) -> Result<()> + Send + Sync>;
pub type BestNodeFn =
    Box<dyn Fn(&Session, &TaskInfo, &HashMap<String, f64>) -> Option<String> + Send + Sync>;
pub type TargetJobFn = Box<dyn Fn(&Session, &[&JobInfo]) -> Option<JobId> + Send + Sync>;
pub type ReservedNodesFn = Box<dyn Fn(&Session) + Send + Sync>;
pub type VictimTasksFn = Box<dyn Fn(&Session, &[TaskId]) -> Vec<TaskId> + Send + Sync>;
pub type HyperNodeOrderFn =
    Box<dyn Fn(&Session, &JobInfo) -> Result<HashMap<String, f64>> + Send + Sync>;

/// A scheduling plugin. Instances are built fresh for every session from
/// the registered builder; all extension points are wired explicitly in
/// `on_session_open`.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn on_session_open(&mut self, ssn: &mut Session);
    fn on_session_close(&mut self, _ssn: &mut Session) {}
}

/// String-keyed plugin configuration with typed getters that fall back to
/// the caller's default when a key is absent or mistyped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Arguments(pub BTreeMap<String, serde_yaml::Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: serde_yaml::Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.0.get(key).and_then(|v| v.as_i64()).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.0
            .get(key)
            .and_then(|v| v.as_f64().or_else(|| v.as_i64().map(|i| i as f64)))
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.0.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_preserve_defaults() {
        let mut args = Arguments::new();
        args.insert("weight", serde_yaml::Value::from(3));
        args.insert("enable", serde_yaml::Value::from(true));

        assert_eq!(args.get_i64("weight", 1), 3);
        assert_eq!(args.get_i64("missing", 7), 7);
        assert!(args.get_bool("enable", false));
        assert_eq!(args.get_f64("weight", 0.0), 3.0);
        assert_eq!(args.get_string("missing", "fallback"), "fallback");
    }
}
