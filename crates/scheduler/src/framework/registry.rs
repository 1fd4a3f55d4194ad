//! Process-wide plugin and action registries
//!
//! Both are write-once: built lazily from a declarative list on first use
//! and read-only afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::{Arguments, Plugin};
use crate::actions;
use crate::plugins;

pub type PluginBuilder = fn(Arguments) -> Box<dyn Plugin>;

static PLUGIN_BUILDERS: OnceLock<HashMap<&'static str, PluginBuilder>> = OnceLock::new();

/// The builtin plugin builders, keyed by configuration name.
pub fn plugin_builders() -> &'static HashMap<&'static str, PluginBuilder> {
    PLUGIN_BUILDERS.get_or_init(|| {
        let mut m: HashMap<&'static str, PluginBuilder> = HashMap::new();
        m.insert(plugins::gang::PLUGIN_NAME, plugins::gang::new);
        m.insert(plugins::priority::PLUGIN_NAME, plugins::priority::new);
        m.insert(plugins::proportion::PLUGIN_NAME, plugins::proportion::new);
        m.insert(plugins::predicates::PLUGIN_NAME, plugins::predicates::new);
        m.insert(plugins::nodeorder::PLUGIN_NAME, plugins::nodeorder::new);
        m.insert(plugins::conformance::PLUGIN_NAME, plugins::conformance::new);
        m.insert(plugins::binpack::PLUGIN_NAME, plugins::binpack::new);
        m.insert(plugins::drf::PLUGIN_NAME, plugins::drf::new);
        m.insert(
            plugins::dynamicresources::PLUGIN_NAME,
            plugins::dynamicresources::new,
        );
        m.insert(
            plugins::networktopologyaware::PLUGIN_NAME,
            plugins::networktopologyaware::new,
        );
        m.insert(plugins::rescheduling::PLUGIN_NAME, plugins::rescheduling::new);
        m
    })
}

/// Build a plugin instance for one session, or `None` for an unknown name.
pub fn new_plugin(name: &str, arguments: Arguments) -> Option<Box<dyn Plugin>> {
    plugin_builders().get(name).map(|builder| builder(arguments))
}

static ACTION_NAMES: &[&str] = &[
    "enqueue", "allocate", "preempt", "reclaim", "backfill", "shuffle",
];

/// Names of every registered action.
pub fn action_names() -> &'static [&'static str] {
    ACTION_NAMES
}

/// Build the named action, or `None` for an unknown name.
pub fn new_action(name: &str) -> Option<Box<dyn actions::Action>> {
    let action: Box<dyn actions::Action> = match name {
        "enqueue" => Box::new(actions::enqueue::Enqueue),
        "allocate" => Box::new(actions::allocate::Allocate),
        "preempt" => Box::new(actions::preempt::Preempt),
        "reclaim" => Box::new(actions::reclaim::Reclaim),
        "backfill" => Box::new(actions::backfill::Backfill),
        "shuffle" => Box::new(actions::shuffle::Shuffle),
        _ => return None,
    };
    Some(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_plugin_is_registered() {
        for name in [
            "gang",
            "priority",
            "proportion",
            "drf",
            "predicates",
            "nodeorder",
            "conformance",
            "binpack",
            "networktopologyaware",
            "rescheduling",
            "dynamicresources",
        ] {
            assert!(
                plugin_builders().contains_key(name),
                "plugin {name} missing from registry"
            );
        }
    }

    #[test]
    fn every_action_resolves() {
        for name in action_names() {
            assert!(new_action(name).is_some(), "action {name} missing");
        }
        assert!(new_action("warp").is_none());
    }
}
