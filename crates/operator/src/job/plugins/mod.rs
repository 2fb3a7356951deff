//! Job plugins enabled per job through `spec.plugins`.
//!
//! Plugins are looked up in a `PluginRegistry` that the controller builds
//! at startup and owns; there is no process-wide plugin table.

mod ssh;
mod svc;

pub use ssh::{SshPlugin, SSH_PLUGIN};
pub use svc::{SvcPlugin, SVC_PLUGIN};

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::ResourceExt;
use tracing::warn;

use crate::{
    crd::{Job, TaskSpec},
    Result,
};

/// An object a plugin needs in the job's namespace before its pods start.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginResource {
    ConfigMap(ConfigMap),
    Service(Service),
}

impl PluginResource {
    pub fn name(&self) -> String {
        match self {
            PluginResource::ConfigMap(cm) => cm.name_any(),
            PluginResource::Service(svc) => svc.name_any(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PluginResource::ConfigMap(_) => "ConfigMap",
            PluginResource::Service(_) => "Service",
        }
    }
}

pub trait JobPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Objects to create once per job, before the first pod is submitted.
    fn on_job_add(&self, _job: &Job) -> Result<Vec<PluginResource>> {
        Ok(Vec::new())
    }

    /// Mutates a freshly materialized pod before it is submitted.
    fn on_pod_create(&self, pod: Pod, task: &TaskSpec, job: &Job) -> Result<Pod>;
}

/// Builds a plugin from the arguments listed under `spec.plugins`.
pub type PluginBuilder = fn(&[String]) -> Box<dyn JobPlugin>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    builders: BTreeMap<String, PluginBuilder>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in plugins.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SVC_PLUGIN, |_args| Box::new(SvcPlugin) as Box<dyn JobPlugin>);
        registry.register(SSH_PLUGIN, |args| Box::new(SshPlugin::new(args)) as Box<dyn JobPlugin>);
        registry
    }

    pub fn register(&mut self, name: &str, builder: PluginBuilder) {
        self.builders.insert(name.to_string(), builder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Instantiates the plugins `job` asks for, in plugin name order.
    /// Unknown plugin names are skipped.
    pub fn plugins_for(&self, job: &Job) -> Vec<Box<dyn JobPlugin>> {
        job.spec
            .plugins
            .iter()
            .filter_map(|(name, args)| match self.builders.get(name) {
                Some(builder) => Some(builder(args)),
                None => {
                    warn!("Unknown plugin '{}' requested by job {}", name, job.name_any());
                    None
                }
            })
            .collect()
    }
}

/// Runs every plugin's pod hook over `pod` in order.
pub fn decorate(
    plugins: &[Box<dyn JobPlugin>],
    mut pod: Pod,
    task: &TaskSpec,
    job: &Job,
) -> Result<Pod> {
    for plugin in plugins {
        pod = plugin.on_pod_create(pod, task, job)?;
    }
    Ok(pod)
}
