//! Job plugins: companion wiring hooks keyed off `spec.plugins`
//!
//! Each plugin can decorate pods at creation and own side-objects tied
//! to the job's lifetime. Hooks run for every plugin the job requests,
//! in name order.

pub mod env;
pub mod mpi;
pub mod ssh;
pub mod svc;

use async_trait::async_trait;

use gangway_core::Pod;
use gangway_ports::CompanionClient;

use crate::apis::Job;
use crate::error::{ControllerError, Result};

#[async_trait]
pub trait JobPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Decorate a pod before it is created.
    fn on_pod_create(&self, _pod: &mut Pod, _job: &Job) -> Result<()> {
        Ok(())
    }

    /// Create side-objects when the job appears; must be idempotent.
    async fn on_job_add(&self, _job: &Job, _companions: &dyn CompanionClient) -> Result<()> {
        Ok(())
    }

    /// Tear side-objects down when the job is killed or deleted.
    async fn on_job_delete(&self, _job: &Job, _companions: &dyn CompanionClient) -> Result<()> {
        Ok(())
    }
}

fn build(name: &str, arguments: &[String]) -> Option<Box<dyn JobPlugin>> {
    match name {
        "svc" => Some(Box::new(svc::SvcPlugin)),
        "ssh" => Some(Box::new(ssh::SshPlugin)),
        "env" => Some(Box::new(env::EnvPlugin)),
        "mpi" => Some(Box::new(mpi::MpiPlugin::new(arguments))),
        _ => None,
    }
}

fn plugins_of(job: &Job) -> Result<Vec<Box<dyn JobPlugin>>> {
    let mut out = Vec::new();
    for (name, arguments) in &job.spec.plugins {
        match build(name, arguments) {
            Some(plugin) => out.push(plugin),
            None => {
                return Err(ControllerError::Plugin {
                    plugin: name.clone(),
                    message: "unknown job plugin".to_string(),
                })
            }
        }
    }
    Ok(out)
}

pub fn on_pod_create(pod: &mut Pod, job: &Job) -> Result<()> {
    for plugin in plugins_of(job)? {
        plugin.on_pod_create(pod, job)?;
    }
    Ok(())
}

pub async fn on_job_add(job: &Job, companions: &dyn CompanionClient) -> Result<()> {
    for plugin in plugins_of(job)? {
        plugin.on_job_add(job, companions).await?;
    }
    Ok(())
}

pub async fn on_job_delete(job: &Job, companions: &dyn CompanionClient) -> Result<()> {
    for plugin in plugins_of(job)? {
        plugin.on_job_delete(job, companions).await?;
    }
    Ok(())
}
