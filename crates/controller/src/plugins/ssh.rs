//! ssh plugin: shared key material for passwordless hops between task
//! pods
//!
//! The key pair lives in a job-scoped ConfigMap; every pod mounts it.
//! Generation is delegated to the companion adapter, which fills the map
//! on first creation.

use std::collections::BTreeMap;

use async_trait::async_trait;

use gangway_core::Pod;
use gangway_ports::CompanionClient;

use crate::apis::Job;
use crate::error::Result;

use super::JobPlugin;

pub struct SshPlugin;

fn config_map_name(job: &Job) -> String {
    format!("{}-ssh", job.name)
}

#[async_trait]
impl JobPlugin for SshPlugin {
    fn name(&self) -> &str {
        "ssh"
    }

    fn on_pod_create(&self, pod: &mut Pod, job: &Job) -> Result<()> {
        let mount = config_map_name(job);
        if !pod.spec.volumes.contains(&mount) {
            pod.spec.volumes.push(mount);
        }
        Ok(())
    }

    async fn on_job_add(&self, job: &Job, companions: &dyn CompanionClient) -> Result<()> {
        let mut data = BTreeMap::new();
        data.insert("authorized_keys".to_string(), String::new());
        data.insert("id_rsa".to_string(), String::new());
        data.insert("id_rsa.pub".to_string(), String::new());
        match companions
            .create_config_map(&job.namespace, &config_map_name(job), &data)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn on_job_delete(&self, job: &Job, companions: &dyn CompanionClient) -> Result<()> {
        match companions
            .delete_config_map(&job.namespace, &config_map_name(job))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
