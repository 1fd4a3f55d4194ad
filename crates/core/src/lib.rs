//! Domain model for the gangway batch scheduler
//!
//! Pure projections and arithmetic: resources, tasks, jobs, queues,
//! nodes, and the hypernode topology. No I/O, no cluster client; those
//! live behind the ports.

pub mod error;
pub mod hypernode;
pub mod job;
pub mod node;
pub mod pod;
pub mod queue;
pub mod resource;
pub mod task;

pub use crate::error::{FitError, FitErrors, Result, SchedError};
pub use crate::hypernode::HyperNodeTree;
pub use crate::job::{JobId, JobInfo, PodGroup, PodGroupPhase};
pub use crate::node::{NodeConditions, NodeInfo, NodeUsage};
pub use crate::pod::{
    Pod, PodAffinityTerm, PodPhase, PodSpec, PodVolumes, PreemptPolicy, PriorityClass, Taint,
    TaintEffect, Toleration, TolerationOperator,
};
pub use crate::queue::{QueueId, QueueInfo};
pub use crate::resource::{DimensionSet, MissingDimension, Resource};
pub use crate::task::{TaskId, TaskInfo, TaskStatus};
