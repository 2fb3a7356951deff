use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Pod, PodSpec, Service, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::{JobPlugin, PluginResource};
use crate::{
    crd::{Job, TaskSpec, JOB_NAMESPACE_KEY, JOB_NAME_KEY},
    job::pod::{job_owner_reference, make_pod_name},
    Result,
};

pub const SVC_PLUGIN: &str = "svc";

const HOSTS_MOUNT_PATH: &str = "/etc/volcano";

/// Gives every pod a stable DNS name `<pod>.<job>` behind a headless
/// service and mounts a `<job>-svc` ConfigMap listing each task's hosts
/// under the key `<task>.host`.
pub struct SvcPlugin;

impl SvcPlugin {
    pub fn config_map_name(job: &Job) -> String {
        format!("{}-{}", job.name_any(), SVC_PLUGIN)
    }

    fn hosts(job: &Job) -> BTreeMap<String, String> {
        let job_name = job.name_any();
        job.spec
            .tasks
            .iter()
            .map(|task| {
                let hosts: Vec<String> = (0..task.replicas.max(0))
                    .map(|index| format!("{}.{}", make_pod_name(&job_name, &task.name, index), job_name))
                    .collect();
                (format!("{}.host", task.name), hosts.join("\n"))
            })
            .collect()
    }

    fn metadata(job: &Job, name: String) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: job.namespace(),
            owner_references: Some(vec![job_owner_reference(job)]),
            ..Default::default()
        }
    }
}

impl JobPlugin for SvcPlugin {
    fn name(&self) -> &str {
        SVC_PLUGIN
    }

    fn on_job_add(&self, job: &Job) -> Result<Vec<PluginResource>> {
        let job_name = job.name_any();

        let config_map = ConfigMap {
            metadata: Self::metadata(job, Self::config_map_name(job)),
            data: Some(Self::hosts(job)),
            ..Default::default()
        };

        let selector = BTreeMap::from([
            (JOB_NAME_KEY.to_string(), job_name.clone()),
            (JOB_NAMESPACE_KEY.to_string(), job.namespace().unwrap_or_default()),
        ]);
        let service = Service {
            metadata: Self::metadata(job, job_name),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: Some(selector),
                publish_not_ready_addresses: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(vec![
            PluginResource::ConfigMap(config_map),
            PluginResource::Service(service),
        ])
    }

    fn on_pod_create(&self, mut pod: Pod, _task: &TaskSpec, job: &Job) -> Result<Pod> {
        let config_map = Self::config_map_name(job);
        let pod_name = pod.metadata.name.clone();
        let spec = pod.spec.get_or_insert_with(PodSpec::default);

        if spec.hostname.is_none() {
            spec.hostname = pod_name;
        }
        if spec.subdomain.is_none() {
            spec.subdomain = Some(job.name_any());
        }

        let volumes = spec.volumes.get_or_insert_with(Vec::new);
        if !volumes.iter().any(|v| v.name == config_map) {
            volumes.push(Volume {
                name: config_map.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: Some(config_map.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        for container in spec.containers.iter_mut() {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if !mounts.iter().any(|m| m.name == config_map) {
                mounts.push(VolumeMount {
                    name: config_map.clone(),
                    mount_path: HOSTS_MOUNT_PATH.to_string(),
                    ..Default::default()
                });
            }
        }

        Ok(pod)
    }
}
