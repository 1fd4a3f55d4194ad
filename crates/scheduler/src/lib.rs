//! gangway-scheduler: session, plugins, and actions for batch placement
//!
//! One cycle snapshots the cluster, opens a session, lets the configured
//! tiers of plugins register their extension points, then runs the
//! configured actions. All cluster writes leave through the ports at
//! statement commit and session close.

pub mod actions;
pub mod cache;
pub mod framework;
pub mod plugins;
pub mod scheduler;
pub mod testing;
pub mod util;

pub use crate::cache::{ClusterSnapshot, SchedulerCache};
pub use crate::framework::{
    Arguments, Plugin, SchedulerConf, Session, SessionPorts, Statement, Tier, Vote,
};
pub use crate::scheduler::Scheduler;
