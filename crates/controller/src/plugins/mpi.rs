//! mpi plugin: master/worker wiring for MPI-shaped jobs
//!
//! Every pod learns the master's stable address and the ssh port; the
//! master task defaults to the first task in the spec.

use gangway_core::Pod;

use crate::apis::{pod_name, Job};
use crate::error::Result;

use super::JobPlugin;

pub const MASTER_ADDR_ENV: &str = "MPI_MASTER_ADDR";
pub const MASTER_PORT_ENV: &str = "MPI_MASTER_PORT";

const DEFAULT_PORT: &str = "22";

pub struct MpiPlugin {
    master_task: Option<String>,
    port: String,
}

impl MpiPlugin {
    /// Arguments: `--master=<task>` and `--port=<port>`.
    pub fn new(arguments: &[String]) -> Self {
        let mut master_task = None;
        let mut port = DEFAULT_PORT.to_string();
        for arg in arguments {
            if let Some(value) = arg.strip_prefix("--master=") {
                master_task = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("--port=") {
                port = value.to_string();
            }
        }
        Self { master_task, port }
    }
}

impl JobPlugin for MpiPlugin {
    fn name(&self) -> &str {
        "mpi"
    }

    fn on_pod_create(&self, pod: &mut Pod, job: &Job) -> Result<()> {
        let master = self
            .master_task
            .clone()
            .or_else(|| job.spec.tasks.first().map(|t| t.name.clone()));
        let Some(master) = master else {
            return Ok(());
        };
        let addr = format!("{}.{}", pod_name(&job.name, &master, 0), job.name);
        pod.spec.env.insert(MASTER_ADDR_ENV.to_string(), addr);
        pod.spec
            .env
            .insert(MASTER_PORT_ENV.to_string(), self.port.clone());
        Ok(())
    }
}
