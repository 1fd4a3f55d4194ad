//! Error taxonomy shared across the scheduler and the job controller

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedError>;

/// Base error type for scheduling decisions and cluster writes.
///
/// Predicate failures are deliberately not part of this enum: they are
/// per-(task, node) diagnostics recorded on the job, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedError {
    #[error("resource is not sufficient to do operation: <{have}> sub <{want}>")]
    InsufficientResource { have: String, want: String },

    #[error("gang unsatisfied: job {job} has {ready} ready tasks, requires {min_available}")]
    GangUnsatisfied {
        job: String,
        ready: u32,
        min_available: u32,
    },

    #[error("transient cluster api error: {0}")]
    TransientApi(String),

    #[error("plugin {plugin} panicked at extension point {point}")]
    PluginPanic { plugin: String, point: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("job {job} is invalid: {reason}")]
    JobInvalid { job: String, reason: String },

    #[error("task {0} not found in session")]
    TaskNotFound(String),

    #[error("job {0} not found in session")]
    JobNotFound(String),

    #[error("node {0} not found in session")]
    NodeNotFound(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Why a task does not fit on one node. Collected per (task, node) in
/// `JobInfo::nodes_fit_errors` and surfaced as a pod event, never returned
/// through `SchedError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitError {
    pub task_name: String,
    pub node_name: String,
    pub reasons: Vec<String>,
}

impl FitError {
    pub fn new(task_name: &str, node_name: &str, reason: impl Into<String>) -> Self {
        Self {
            task_name: task_name.to_string(),
            node_name: node_name.to_string(),
            reasons: vec![reason.into()],
        }
    }

    pub fn with_reasons(task_name: &str, node_name: &str, reasons: Vec<String>) -> Self {
        Self {
            task_name: task_name.to_string(),
            node_name: node_name.to_string(),
            reasons,
        }
    }
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "task {} does not fit on node {}: {}",
            self.task_name,
            self.node_name,
            self.reasons.join(", ")
        )
    }
}

/// Aggregated fit errors of one task across every node of a cycle.
#[derive(Debug, Clone, Default)]
pub struct FitErrors {
    pub errors: Vec<FitError>,
}

impl FitErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: FitError) {
        self.errors.push(err);
    }

    /// Human-readable rollup grouped by reason, the form surfaced on pod events.
    pub fn rollup(&self) -> String {
        use std::collections::BTreeMap;
        let mut by_reason: BTreeMap<&str, usize> = BTreeMap::new();
        for err in &self.errors {
            for reason in &err.reasons {
                *by_reason.entry(reason.as_str()).or_default() += 1;
            }
        }
        by_reason
            .into_iter()
            .map(|(reason, count)| format!("{count} node(s) {reason}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_errors_rollup_groups_by_reason() {
        let mut errs = FitErrors::new();
        errs.push(FitError::new("t1", "n1", "insufficient cpu"));
        errs.push(FitError::new("t1", "n2", "insufficient cpu"));
        errs.push(FitError::new("t1", "n3", "node unschedulable"));

        let rollup = errs.rollup();
        assert!(rollup.contains("2 node(s) insufficient cpu"));
        assert!(rollup.contains("1 node(s) node unschedulable"));
    }
}
