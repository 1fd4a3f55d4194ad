//! Queue projection: a named resource share in the weighted queue tree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::Resource;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub String);

impl QueueId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueueId {
    fn from(s: &str) -> Self {
        QueueId(s.to_string())
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queues form a tree: siblings under one parent share by `weight`;
/// `capability` is an absolute cap (unbounded where unset) and
/// `guarantee` a floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub uid: QueueId,
    pub name: String,
    pub weight: u32,
    #[serde(default)]
    pub parent: Option<QueueId>,
    #[serde(default)]
    pub capability: Option<Resource>,
    #[serde(default)]
    pub guarantee: Resource,
    #[serde(default)]
    pub priority: i32,
    pub creation_timestamp: DateTime<Utc>,
}

impl QueueInfo {
    pub fn new(name: &str, weight: u32) -> Self {
        Self {
            uid: QueueId(name.to_string()),
            name: name.to_string(),
            weight,
            parent: None,
            capability: None,
            guarantee: Resource::empty(),
            priority: 0,
            creation_timestamp: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(QueueId(parent.to_string()));
        self
    }

    pub fn with_capability(mut self, capability: Resource) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_guarantee(mut self, guarantee: Resource) -> Self {
        self.guarantee = guarantee;
        self
    }

    /// Stable default ordering: creation time, then UID.
    pub fn default_cmp(l: &QueueInfo, r: &QueueInfo) -> std::cmp::Ordering {
        l.creation_timestamp
            .cmp(&r.creation_timestamp)
            .then_with(|| l.uid.cmp(&r.uid))
    }
}
