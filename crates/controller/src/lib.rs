//! gangway-controller: reconciles Job resources into pods and companions
//!
//! A rate-limited, de-duplicating work queue feeds a worker pool; each
//! reconciliation resolves the lifecycle action for the triggering event
//! and drives the per-phase state machine, whose transitions are built
//! from the SyncJob and KillJob primitives.

pub mod actions;
pub mod apis;
pub mod cache;
pub mod controller;
pub mod error;
pub mod plugins;
pub mod state;

pub use crate::apis::{
    pod_name, Job, JobAction, JobEvent, JobPhase, JobSpec, JobState, JobStatus, LifecyclePolicy,
    TaskSpec, VolumeSpec,
};
pub use crate::cache::{JobCache, JobInfo};
pub use crate::controller::{
    Controller, ControllerPorts, JobStatusSink, NullStatusSink, Request, DEFAULT_WORKERS,
};
pub use crate::error::{ControllerError, Result};
