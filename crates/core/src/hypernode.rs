//! Network topology: tiered hypernodes over the node inventory
//!
//! Tier 1 hypernodes group nodes directly (rack/spine); higher tiers
//! aggregate lower ones. One representation is kept: per-tier name lists
//! plus a name -> descendant-leaf-node set map.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperNodeTree {
    /// Ascending tier numbers present in the topology.
    pub tiers: Vec<i32>,
    /// Tier -> hypernode names on that tier.
    pub by_tier: BTreeMap<i32, Vec<String>>,
    /// Hypernode name -> every leaf node reachable under it.
    pub members: HashMap<String, HashSet<String>>,
}

impl HyperNodeTree {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn add(&mut self, name: &str, tier: i32, leaf_nodes: impl IntoIterator<Item = String>) {
        if !self.tiers.contains(&tier) {
            self.tiers.push(tier);
            self.tiers.sort_unstable();
        }
        let names = self.by_tier.entry(tier).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        self.members
            .entry(name.to_string())
            .or_default()
            .extend(leaf_nodes);
    }

    pub fn tier_of(&self, name: &str) -> Option<i32> {
        for (tier, names) in &self.by_tier {
            if names.iter().any(|n| n == name) {
                return Some(*tier);
            }
        }
        None
    }

    pub fn leaf_nodes_of(&self, name: &str) -> Option<&HashSet<String>> {
        self.members.get(name)
    }

    /// Lowest-tier hypernode covering every leaf node in `nodes`.
    pub fn find_lca_of_nodes<'a>(&self, nodes: impl IntoIterator<Item = &'a str>) -> Option<String> {
        let wanted: HashSet<&str> = nodes.into_iter().collect();
        if wanted.is_empty() {
            return None;
        }
        for tier in &self.tiers {
            for name in self.by_tier.get(tier).into_iter().flatten() {
                let members = &self.members[name];
                if wanted.iter().all(|n| members.contains(*n)) {
                    return Some(name.clone());
                }
            }
        }
        None
    }

    /// Lowest common ancestor of two hypernodes, with its tier.
    pub fn find_lca(&self, a: &str, b: &str) -> Option<(String, i32)> {
        if a == b {
            return self.tier_of(a).map(|t| (a.to_string(), t));
        }
        let ma = self.members.get(a)?;
        let mb = self.members.get(b)?;
        for tier in &self.tiers {
            for name in self.by_tier.get(tier).into_iter().flatten() {
                let members = &self.members[name];
                if ma.is_subset(members) && mb.is_subset(members) {
                    return Some((name.clone(), *tier));
                }
            }
        }
        None
    }

    /// Where would the job's root land if `candidate` joined its placed
    /// set: the LCA of the candidate and the job's current LCA hypernode.
    /// A job with nothing placed roots at the candidate itself.
    pub fn find_out_root(&self, candidate: &str, job_lca: Option<&str>) -> Option<(String, i32)> {
        match job_lca {
            None => self.tier_of(candidate).map(|t| (candidate.to_string(), t)),
            Some(lca) => self.find_lca(candidate, lca),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two racks under one spine, plus a second spine-level island.
    fn tree() -> HyperNodeTree {
        let mut t = HyperNodeTree::default();
        t.add("rack-a", 1, ["n1".into(), "n2".into()]);
        t.add("rack-b", 1, ["n3".into(), "n4".into()]);
        t.add("rack-c", 1, ["n5".into()]);
        t.add("spine-1", 2, ["n1".into(), "n2".into(), "n3".into(), "n4".into()]);
        t.add("spine-2", 2, ["n5".into()]);
        t.add(
            "core",
            3,
            ["n1".into(), "n2".into(), "n3".into(), "n4".into(), "n5".into()],
        );
        t
    }

    #[test]
    fn lca_of_nodes_picks_lowest_cover() {
        let t = tree();
        assert_eq!(t.find_lca_of_nodes(["n1", "n2"]), Some("rack-a".into()));
        assert_eq!(t.find_lca_of_nodes(["n1", "n3"]), Some("spine-1".into()));
        assert_eq!(t.find_lca_of_nodes(["n1", "n5"]), Some("core".into()));
    }

    #[test]
    fn find_out_root_from_empty_job() {
        let t = tree();
        assert_eq!(t.find_out_root("rack-a", None), Some(("rack-a".into(), 1)));
        assert_eq!(
            t.find_out_root("rack-b", Some("rack-a")),
            Some(("spine-1".into(), 2))
        );
    }
}
