//! Scheduler configuration: ordered actions and tiers of plugins
//!
//! Parsed from YAML. Example:
//!
//! ```yaml
//! actions: "enqueue, allocate, preempt, reclaim, backfill"
//! tiers:
//!   - plugins:
//!     - name: priority
//!     - name: gang
//!       enabledJobReady: true
//!   - plugins:
//!     - name: proportion
//!     - name: predicates
//!     - name: nodeorder
//!       arguments:
//!         leastrequested.weight: 1
//!         balancedresource.weight: 1
//! ```

use serde::Deserialize;

use gangway_core::SchedError;

use super::registry;
use super::Arguments;

/// One plugin's slot in a tier: its name, arguments, and the enable flag
/// per extension point. An omitted flag falls back to the documented
/// default (enabled), so listing a plugin turns on everything it
/// registers unless explicitly switched off.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
    #[serde(default)]
    pub enabled_job_order: Option<bool>,
    #[serde(default)]
    pub enabled_task_order: Option<bool>,
    #[serde(default)]
    pub enabled_queue_order: Option<bool>,
    #[serde(default)]
    pub enabled_namespace_order: Option<bool>,
    #[serde(default)]
    pub enabled_cluster_order: Option<bool>,
    #[serde(default)]
    pub enabled_node_order: Option<bool>,
    #[serde(default)]
    pub enabled_predicate: Option<bool>,
    #[serde(default)]
    pub enabled_preemptable: Option<bool>,
    #[serde(default)]
    pub enabled_reclaimable: Option<bool>,
    #[serde(default)]
    pub enabled_overused: Option<bool>,
    #[serde(default)]
    pub enabled_allocatable: Option<bool>,
    #[serde(default)]
    pub enabled_job_ready: Option<bool>,
    #[serde(default)]
    pub enabled_job_pipelined: Option<bool>,
    #[serde(default)]
    pub enabled_job_starving: Option<bool>,
    #[serde(default)]
    pub enabled_job_enqueued: Option<bool>,
    #[serde(default)]
    pub enabled_target_job: Option<bool>,
    #[serde(default)]
    pub enabled_reserved_nodes: Option<bool>,
    #[serde(default)]
    pub enabled_victim: Option<bool>,
    #[serde(default)]
    pub enabled_best_node: Option<bool>,
    #[serde(default)]
    pub enabled_network_topology: Option<bool>,
    #[serde(default)]
    pub enable_preemptive: Option<bool>,
}

impl PluginSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            arguments: Arguments::new(),
            enabled_job_order: None,
            enabled_task_order: None,
            enabled_queue_order: None,
            enabled_namespace_order: None,
            enabled_cluster_order: None,
            enabled_node_order: None,
            enabled_predicate: None,
            enabled_preemptable: None,
            enabled_reclaimable: None,
            enabled_overused: None,
            enabled_allocatable: None,
            enabled_job_ready: None,
            enabled_job_pipelined: None,
            enabled_job_starving: None,
            enabled_job_enqueued: None,
            enabled_target_job: None,
            enabled_reserved_nodes: None,
            enabled_victim: None,
            enabled_best_node: None,
            enabled_network_topology: None,
            enable_preemptive: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }
}

/// Omitted flags read as enabled; `false` must be spelled out.
pub fn is_enabled(flag: Option<bool>) -> bool {
    flag.unwrap_or(true)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tier {
    pub plugins: Vec<PluginSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConf {
    actions: String,
    #[serde(default)]
    tiers: Vec<Tier>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConf {
    pub actions: Vec<String>,
    pub tiers: Vec<Tier>,
}

impl SchedulerConf {
    /// Parse and validate a YAML configuration. Unknown actions or
    /// plugins are fatal here and nowhere else.
    pub fn parse(yaml: &str) -> Result<Self, SchedError> {
        let raw: RawConf =
            serde_yaml::from_str(yaml).map_err(|e| SchedError::Config(e.to_string()))?;

        let actions: Vec<String> = raw
            .actions
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if actions.is_empty() {
            return Err(SchedError::Config("no actions configured".to_string()));
        }
        for action in &actions {
            if !registry::action_names().contains(&action.as_str()) {
                return Err(SchedError::Config(format!("unknown action {action}")));
            }
        }
        for tier in &raw.tiers {
            for plugin in &tier.plugins {
                if !registry::plugin_builders().contains_key(plugin.name.as_str()) {
                    return Err(SchedError::Config(format!("unknown plugin {}", plugin.name)));
                }
            }
        }

        Ok(Self {
            actions,
            tiers: raw.tiers,
        })
    }

    /// The configuration used when none is supplied.
    pub fn default_conf() -> Self {
        Self {
            actions: vec![
                "enqueue".to_string(),
                "allocate".to_string(),
                "backfill".to_string(),
            ],
            tiers: vec![
                Tier {
                    plugins: vec![PluginSpec::new("priority"), PluginSpec::new("gang"), PluginSpec::new("conformance")],
                },
                Tier {
                    plugins: vec![
                        PluginSpec::new("proportion"),
                        PluginSpec::new("predicates"),
                        PluginSpec::new("nodeorder"),
                    ],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_actions_and_tiers() {
        let conf = SchedulerConf::parse(
            r#"
actions: "enqueue, allocate, preempt, reclaim, backfill"
tiers:
  - plugins:
    - name: priority
    - name: gang
      enabledJobReady: true
  - plugins:
    - name: proportion
    - name: predicates
    - name: nodeorder
      arguments:
        leastrequested.weight: 2
"#,
        )
        .unwrap();

        assert_eq!(
            conf.actions,
            vec!["enqueue", "allocate", "preempt", "reclaim", "backfill"]
        );
        assert_eq!(conf.tiers.len(), 2);
        let gang = &conf.tiers[0].plugins[1];
        assert_eq!(gang.name, "gang");
        assert_eq!(gang.enabled_job_ready, Some(true));
        let nodeorder = &conf.tiers[1].plugins[2];
        assert_eq!(nodeorder.arguments.get_i64("leastrequested.weight", 1), 2);
    }

    #[test]
    fn unknown_plugin_is_fatal() {
        let err = SchedulerConf::parse(
            r#"
actions: "allocate"
tiers:
  - plugins:
    - name: nosuchplugin
"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchedError::Config(_)));
    }

    #[test]
    fn unknown_action_is_fatal() {
        let err = SchedulerConf::parse("actions: \"allocate, warp\"\n").unwrap_err();
        assert!(matches!(err, SchedError::Config(_)));
    }

    #[test]
    fn omitted_flag_reads_enabled() {
        assert!(is_enabled(None));
        assert!(is_enabled(Some(true)));
        assert!(!is_enabled(Some(false)));
    }
}
