//! Multi-dimensional resource arithmetic
//!
//! A `Resource` is a fixed-schema vector of milli-CPU, memory bytes, and
//! named scalar resources (GPUs and the like). Every comparison goes
//! through per-dimension epsilons so floating-point drift is invisible to
//! scheduling decisions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};

/// Smallest visible difference in milli-CPU.
pub const MIN_MILLI_CPU: f64 = 10.0;
/// Smallest visible difference in memory, 10 MiB.
pub const MIN_MEMORY: f64 = 10.0 * 1024.0 * 1024.0;
/// Smallest visible difference in a scalar resource (milli-units).
pub const MIN_SCALAR: f64 = 10.0;

/// Which dimensions participate in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimensionSet {
    /// Skip dimensions the left side asks zero of ("asked zero" means
    /// "don't care").
    Zero,
    /// Scalar dimensions absent on the right side are treated as
    /// unbounded; cpu and memory always participate.
    Infinity,
    /// Every dimension of either side participates; absent scalars read
    /// as zero.
    All,
}

/// How `min_dimension_resource` treats a dimension the bound does not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDimension {
    /// Clamp the dimension to zero.
    Zero,
    /// Leave the dimension untouched.
    Infinity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub milli_cpu: f64,
    pub memory: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scalars: BTreeMap<String, f64>,
}

fn epsilon_of(name: &str) -> f64 {
    match name {
        "cpu" => MIN_MILLI_CPU,
        "memory" => MIN_MEMORY,
        _ => MIN_SCALAR,
    }
}

impl Resource {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(milli_cpu: f64, memory: f64) -> Self {
        Self {
            milli_cpu,
            memory,
            scalars: BTreeMap::new(),
        }
    }

    pub fn with_scalar(mut self, name: &str, value: f64) -> Self {
        self.scalars.insert(name.to_string(), value);
        self
    }

    /// Names of every dimension this vector carries.
    pub fn resource_names(&self) -> Vec<String> {
        let mut names = vec!["cpu".to_string(), "memory".to_string()];
        names.extend(self.scalars.keys().cloned());
        names
    }

    pub fn get(&self, name: &str) -> f64 {
        match name {
            "cpu" => self.milli_cpu,
            "memory" => self.memory,
            _ => self.scalars.get(name).copied().unwrap_or(0.0),
        }
    }

    fn set(&mut self, name: &str, value: f64) {
        match name {
            "cpu" => self.milli_cpu = value,
            "memory" => self.memory = value,
            _ => {
                self.scalars.insert(name.to_string(), value);
            }
        }
    }

    /// True when every dimension is below its epsilon.
    pub fn is_empty(&self) -> bool {
        self.milli_cpu < MIN_MILLI_CPU
            && self.memory < MIN_MEMORY
            && self.scalars.values().all(|v| *v < MIN_SCALAR)
    }

    /// True when the named dimension is below its epsilon.
    pub fn is_zero(&self, name: &str) -> bool {
        self.get(name) < epsilon_of(name)
    }

    pub fn add(&mut self, rr: &Resource) -> &mut Self {
        self.milli_cpu += rr.milli_cpu;
        self.memory += rr.memory;
        for (name, value) in &rr.scalars {
            *self.scalars.entry(name.clone()).or_insert(0.0) += value;
        }
        self
    }

    /// Subtract `rr`, failing when any dimension would go negative beyond
    /// its epsilon.
    pub fn sub(&mut self, rr: &Resource) -> Result<&mut Self> {
        if !rr.less_equal(self, DimensionSet::All) {
            return Err(SchedError::InsufficientResource {
                have: self.to_string(),
                want: rr.to_string(),
            });
        }
        self.milli_cpu = (self.milli_cpu - rr.milli_cpu).max(0.0);
        self.memory = (self.memory - rr.memory).max(0.0);
        for (name, value) in &rr.scalars {
            let entry = self.scalars.entry(name.clone()).or_insert(0.0);
            *entry = (*entry - value).max(0.0);
        }
        Ok(self)
    }

    pub fn multi(&mut self, ratio: f64) -> &mut Self {
        self.milli_cpu *= ratio;
        self.memory *= ratio;
        for value in self.scalars.values_mut() {
            *value *= ratio;
        }
        self
    }

    /// Non-mutating scaled copy, convenient inside the water-filler.
    pub fn scaled(&self, ratio: f64) -> Resource {
        let mut out = self.clone();
        out.multi(ratio);
        out
    }

    fn dimensions_with(&self, other: &Resource) -> Vec<String> {
        let mut names = vec!["cpu".to_string(), "memory".to_string()];
        for name in self.scalars.keys().chain(other.scalars.keys()) {
            if !names.iter().any(|n| n == name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Elementwise `self <= rr` under the given dimension policy.
    pub fn less_equal(&self, rr: &Resource, dims: DimensionSet) -> bool {
        for name in self.dimensions_with(rr) {
            let l = self.get(&name);
            let eps = epsilon_of(&name);
            match dims {
                DimensionSet::Zero if l < eps => continue,
                DimensionSet::Infinity => {
                    let scalar = name != "cpu" && name != "memory";
                    if scalar && !rr.scalars.contains_key(&name) {
                        continue;
                    }
                }
                _ => {}
            }
            let r = rr.get(&name);
            if !(l < r || (r - l).abs() < eps) {
                return false;
            }
        }
        true
    }

    /// True when at least one participating dimension of `self` is
    /// strictly below the corresponding dimension of `rr`.
    pub fn less_partly(&self, rr: &Resource, dims: DimensionSet) -> bool {
        for name in self.dimensions_with(rr) {
            let l = self.get(&name);
            let r = rr.get(&name);
            let eps = epsilon_of(&name);
            match dims {
                DimensionSet::Zero if r < eps => continue,
                DimensionSet::Infinity => {
                    let scalar = name != "cpu" && name != "memory";
                    if scalar && !rr.scalars.contains_key(&name) {
                        continue;
                    }
                }
                _ => {}
            }
            if l < r - eps {
                return true;
            }
        }
        false
    }

    /// Dimension-wise difference against `other`:
    /// `(increased, decreased)` where both outputs are non-negative.
    pub fn diff(&self, other: &Resource, dims: DimensionSet) -> (Resource, Resource) {
        let mut increased = Resource::empty();
        let mut decreased = Resource::empty();
        for name in self.dimensions_with(other) {
            let l = self.get(&name);
            if dims == DimensionSet::Zero && l < epsilon_of(&name) {
                continue;
            }
            let r = other.get(&name);
            if l > r {
                increased.set(&name, l - r);
            } else {
                decreased.set(&name, r - l);
            }
        }
        (increased, decreased)
    }

    /// Cap every dimension by `bound`. A dimension missing from `bound`
    /// is clamped to zero or left untouched per `missing`.
    pub fn min_dimension_resource(&mut self, bound: &Resource, missing: MissingDimension) -> &mut Self {
        self.milli_cpu = self.milli_cpu.min(bound.milli_cpu);
        self.memory = self.memory.min(bound.memory);
        for (name, value) in self.scalars.iter_mut() {
            match bound.scalars.get(name) {
                Some(cap) => *value = value.min(*cap),
                None => match missing {
                    MissingDimension::Zero => *value = 0.0,
                    MissingDimension::Infinity => {}
                },
            }
        }
        self
    }

    /// Elementwise minimum of two vectors.
    pub fn min(l: &Resource, r: &Resource) -> Resource {
        let mut out = Resource::empty();
        for name in l.dimensions_with(r) {
            out.set(&name, l.get(&name).min(r.get(&name)));
        }
        out
    }

    /// Elementwise maximum of two vectors.
    pub fn max(l: &Resource, r: &Resource) -> Resource {
        let mut out = Resource::empty();
        for name in l.dimensions_with(r) {
            out.set(&name, l.get(&name).max(r.get(&name)));
        }
        out
    }

    /// Share of `allocated` against `deserved` on the dominant dimension,
    /// used by queue planners to compare pressure between queues.
    pub fn share_of(allocated: &Resource, deserved: &Resource) -> f64 {
        let mut share: f64 = 0.0;
        for name in deserved.resource_names() {
            let d = deserved.get(&name);
            if d <= 0.0 {
                continue;
            }
            share = share.max(allocated.get(&name) / d);
        }
        share
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cpu {:.2}, memory {:.2}", self.milli_cpu, self.memory)?;
        for (name, value) in &self.scalars {
            write!(f, ", {name} {value:.2}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gib(n: f64) -> f64 {
        n * 1024.0 * 1024.0 * 1024.0
    }

    #[test]
    fn less_equal_is_epsilon_tolerant() {
        let a = Resource::new(1000.0, gib(1.0));
        let b = Resource::new(1000.0 + 5.0, gib(1.0) + 1024.0);
        // within epsilon in both directions
        assert!(a.less_equal(&b, DimensionSet::All));
        assert!(b.less_equal(&a, DimensionSet::All));

        let c = Resource::new(1020.0, gib(1.0));
        assert!(a.less_equal(&c, DimensionSet::All));
        assert!(!c.less_equal(&a, DimensionSet::All));
    }

    #[test]
    fn zero_dimension_means_dont_care() {
        let req = Resource::new(0.0, gib(1.0));
        let free = Resource::new(0.0, gib(2.0)).with_scalar("nvidia.com/gpu", 0.0);
        assert!(req.less_equal(&free, DimensionSet::Zero));

        let gpu_req = Resource::new(0.0, gib(1.0)).with_scalar("nvidia.com/gpu", 1000.0);
        assert!(!gpu_req.less_equal(&free, DimensionSet::Zero));
    }

    #[test]
    fn infinity_skips_absent_scalars() {
        let req = Resource::new(500.0, gib(1.0)).with_scalar("nvidia.com/gpu", 1000.0);
        let cap = Resource::new(1000.0, gib(4.0));
        // the capability carries no gpu dimension, treat it as unbounded
        assert!(req.less_equal(&cap, DimensionSet::Infinity));
        assert!(!req.less_equal(&cap, DimensionSet::All));
    }

    #[test]
    fn sub_fails_on_underflow() {
        let mut have = Resource::new(1000.0, gib(1.0));
        let want = Resource::new(2000.0, gib(0.5));
        assert!(matches!(
            have.sub(&want),
            Err(SchedError::InsufficientResource { .. })
        ));

        // still intact after the failed operation
        assert_eq!(have.milli_cpu, 1000.0);
    }

    #[test]
    fn diff_splits_increase_and_decrease() {
        let a = Resource::new(3000.0, gib(1.0));
        let b = Resource::new(1000.0, gib(2.0));
        let (inc, dec) = a.diff(&b, DimensionSet::All);
        assert_eq!(inc.milli_cpu, 2000.0);
        assert_eq!(inc.memory, 0.0);
        assert_eq!(dec.milli_cpu, 0.0);
        assert_eq!(dec.memory, gib(1.0));
    }

    #[test]
    fn min_dimension_resource_respects_missing_policy() {
        let cap = Resource::new(1000.0, gib(1.0));

        let mut deserved = Resource::new(4000.0, gib(4.0)).with_scalar("nvidia.com/gpu", 2000.0);
        deserved.min_dimension_resource(&cap, MissingDimension::Infinity);
        assert_eq!(deserved.milli_cpu, 1000.0);
        assert_eq!(deserved.get("nvidia.com/gpu"), 2000.0);

        let mut deserved = Resource::new(4000.0, gib(4.0)).with_scalar("nvidia.com/gpu", 2000.0);
        deserved.min_dimension_resource(&cap, MissingDimension::Zero);
        assert_eq!(deserved.get("nvidia.com/gpu"), 0.0);
    }

    #[test]
    fn min_is_elementwise() {
        let l = Resource::new(1000.0, gib(4.0));
        let r = Resource::new(2000.0, gib(1.0));
        let m = Resource::min(&l, &r);
        assert_eq!(m.milli_cpu, 1000.0);
        assert_eq!(m.memory, gib(1.0));
    }

    #[test]
    fn share_uses_dominant_dimension() {
        let deserved = Resource::new(1000.0, gib(2.0));
        let allocated = Resource::new(250.0, gib(1.0));
        let share = Resource::share_of(&allocated, &deserved);
        assert!((share - 0.5).abs() < 1e-9);
    }

    #[test]
    fn is_empty_under_epsilon() {
        assert!(Resource::new(5.0, 1024.0).is_empty());
        assert!(!Resource::new(100.0, 0.0).is_empty());
    }
}
