//! Pod projection and placement-relevant pod spec fields
//!
//! The core never talks to the cluster API directly; this is the slice of
//! a pod the scheduler and the job controller actually consume.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Terminal pods no longer hold node resources.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TolerationOperator {
    Equal,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toleration {
    pub key: String,
    pub operator: TolerationOperator,
    pub value: String,
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Whether this toleration covers the given taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if !self.key.is_empty() && self.key != taint.key {
            return false;
        }
        if let Some(effect) = &self.effect {
            if *effect != taint.effect {
                return false;
            }
        }
        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

/// Preemption behavior granted by a priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreemptPolicy {
    #[default]
    PreemptLowerPriority,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClass {
    pub name: String,
    pub value: i32,
    #[serde(default)]
    pub preempt_policy: PreemptPolicy,
}

/// One inter-pod (anti-)affinity requirement, matched against the labels
/// of pods already on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodAffinityTerm {
    pub match_labels: BTreeMap<String, String>,
    /// When set, matching pods repel instead of attract.
    pub anti: bool,
}

impl PodAffinityTerm {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Opaque volume placement token handed to the Binder. The core never
/// inspects it; it is produced by whatever volume integration sits behind
/// the port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodVolumes {
    pub claims: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub resources: Resource,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Soft placement preference, scored rather than required.
    #[serde(default)]
    pub preferred_node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub affinity: Vec<PodAffinityTerm>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub host_ports: Vec<u16>,
    #[serde(default)]
    pub priority_class_name: Option<String>,
    #[serde(default)]
    pub scheduler_name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub spec: PodSpec,
    pub phase: PodPhase,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub creation_timestamp: DateTime<Utc>,
}

impl Pod {
    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toleration_matching() {
        let taint = Taint {
            key: "dedicated".into(),
            value: "batch".into(),
            effect: TaintEffect::NoSchedule,
        };

        let exists = Toleration {
            key: "dedicated".into(),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect: None,
        };
        assert!(exists.tolerates(&taint));

        let wrong_value = Toleration {
            key: "dedicated".into(),
            operator: TolerationOperator::Equal,
            value: "interactive".into(),
            effect: Some(TaintEffect::NoSchedule),
        };
        assert!(!wrong_value.tolerates(&taint));
    }
}
