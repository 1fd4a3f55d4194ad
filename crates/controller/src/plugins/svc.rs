//! svc plugin: stable DNS for every task pod
//!
//! A headless service named after the job plus hostname/subdomain on each
//! pod gives `{pod}.{job}.{namespace}` resolution; a hosts ConfigMap
//! lists every expected pod name for runtimes that read files instead of
//! DNS.

use std::collections::BTreeMap;

use async_trait::async_trait;

use gangway_core::Pod;
use gangway_ports::CompanionClient;

use crate::apis::{pod_name, Job};
use crate::error::Result;

use super::JobPlugin;

pub struct SvcPlugin;

fn config_map_name(job: &Job) -> String {
    format!("{}-svc", job.name)
}

fn hosts_of(job: &Job) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    for task in &job.spec.tasks {
        let hosts: Vec<String> = (0..task.replicas)
            .map(|i| format!("{}.{}", pod_name(&job.name, &task.name, i), job.name))
            .collect();
        data.insert(format!("{}.host", task.name), hosts.join("\n"));
    }
    data
}

#[async_trait]
impl JobPlugin for SvcPlugin {
    fn name(&self) -> &str {
        "svc"
    }

    fn on_pod_create(&self, pod: &mut Pod, job: &Job) -> Result<()> {
        if pod.spec.hostname.is_none() {
            pod.spec.hostname = Some(pod.name.clone());
        }
        if pod.spec.subdomain.is_none() {
            pod.spec.subdomain = Some(job.name.clone());
        }
        Ok(())
    }

    async fn on_job_add(&self, job: &Job, companions: &dyn CompanionClient) -> Result<()> {
        match companions
            .create_headless_service(&job.namespace, &job.name)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(err.into()),
        }
        match companions
            .create_config_map(&job.namespace, &config_map_name(job), &hosts_of(job))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    async fn on_job_delete(&self, job: &Job, companions: &dyn CompanionClient) -> Result<()> {
        match companions.delete_service(&job.namespace, &job.name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        match companions
            .delete_config_map(&job.namespace, &config_map_name(job))
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }
}
