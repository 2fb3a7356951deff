use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{
    Job, TaskSpec, DEFAULT_TASK_SPEC, EMPTY_DIR_VOLUME_PREFIX, GROUP_NAME_ANNOTATION_KEY,
    JOB_NAMESPACE_KEY, JOB_NAME_KEY, JOB_VERSION_KEY, TASK_SPEC_KEY,
};

/// Pod name for replica `index` of `task_name`: `{job}-{task}-{index}`.
pub fn make_pod_name(job_name: &str, task_name: &str, index: i32) -> String {
    format!("{}-{}-{}", job_name, task_name, index)
}

/// Controller owner reference pointing at `job`.
pub fn job_owner_reference(job: &Job) -> OwnerReference {
    OwnerReference {
        api_version: Job::api_version(&()).to_string(),
        kind: Job::kind(&()).to_string(),
        name: job.name_any(),
        uid: job.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// True if `meta` has a controller reference to the given api version and kind.
pub fn is_controlled_by(meta: &ObjectMeta, api_version: &str, kind: &str) -> bool {
    meta.owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true))
        .map(|r| r.api_version == api_version && r.kind == kind)
        .unwrap_or(false)
}

/// True if `pod` is controlled by a `Job` of this API group.
pub fn is_job_pod(pod: &Pod) -> bool {
    is_controlled_by(&pod.metadata, &Job::api_version(&()), &Job::kind(&()))
}

/// Builds replica `index` of `task` for `job`.
///
/// The task template is cloned before any change so one template can back
/// many pods. Output depends only on the inputs; building the same
/// `(job, task, index)` twice yields equal pods.
pub fn create_job_pod(job: &Job, task: &TaskSpec, index: i32) -> Pod {
    let template = task.template.clone();
    let template_meta = template.metadata.unwrap_or_default();
    let job_name = job.name_any();
    let namespace = job.namespace().unwrap_or_default();

    let mut pod = Pod {
        metadata: ObjectMeta {
            name: Some(make_pod_name(&job_name, &task.name, index)),
            namespace: Some(namespace.clone()),
            owner_references: Some(vec![job_owner_reference(job)]),
            labels: template_meta.labels,
            annotations: template_meta.annotations,
            ..Default::default()
        },
        spec: Some(template.spec.unwrap_or_default()),
        ..Default::default()
    };

    let spec = pod.spec.get_or_insert_with(PodSpec::default);
    if spec.scheduler_name.as_deref().unwrap_or_default().is_empty()
        && !job.spec.scheduler_name.is_empty()
    {
        spec.scheduler_name = Some(job.spec.scheduler_name.clone());
    }
    attach_job_volumes(job, spec);

    let task_spec_key = template_meta
        .name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_TASK_SPEC.to_string());

    let annotations = pod.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(TASK_SPEC_KEY.to_string(), task_spec_key);
    annotations.insert(GROUP_NAME_ANNOTATION_KEY.to_string(), job_name.clone());
    annotations.insert(JOB_NAME_KEY.to_string(), job_name.clone());
    annotations.insert(JOB_VERSION_KEY.to_string(), job.version().to_string());

    let labels = pod.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(JOB_NAME_KEY.to_string(), job_name);
    labels.insert(JOB_NAMESPACE_KEY.to_string(), namespace);

    pod
}

/// Attaches each job volume claim once and mounts it into every container.
fn attach_job_volumes(job: &Job, spec: &mut PodSpec) {
    let controlled = job
        .status
        .as_ref()
        .map(|s| &s.controlled_resources);
    let mut attached: BTreeSet<String> = spec
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.clone())
        .collect();
    let mut injected: BTreeSet<&str> = BTreeSet::new();

    for volume in &job.spec.volumes {
        let claim_name = volume.volume_claim_name.as_str();
        if !injected.insert(claim_name) {
            continue;
        }

        if attached.insert(claim_name.to_string()) {
            let empty_dir = volume.volume_claim.is_none()
                && controlled
                    .map(|c| c.contains_key(&format!("{}{}", EMPTY_DIR_VOLUME_PREFIX, claim_name)))
                    .unwrap_or(false);

            let mut pod_volume = Volume {
                name: claim_name.to_string(),
                ..Default::default()
            };
            if empty_dir {
                pod_volume.empty_dir = Some(EmptyDirVolumeSource::default());
            } else {
                pod_volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim_name.to_string(),
                    ..Default::default()
                });
            }
            spec.volumes.get_or_insert_with(Vec::new).push(pod_volume);
        }

        for container in spec.containers.iter_mut() {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if mounts.iter().any(|m| m.name == claim_name) {
                continue;
            }
            mounts.push(VolumeMount {
                name: claim_name.to_string(),
                mount_path: volume.mount_path.clone(),
                ..Default::default()
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{JobSpec, JobStatus, VolumeSpec};
    use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaimSpec, PodTemplateSpec};

    fn task(name: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            replicas: 2,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.to_string()),
                    labels: Some(BTreeMap::from([("app".to_string(), "mpi".to_string())])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![
                        Container { name: "main".to_string(), ..Default::default() },
                        Container { name: "sidecar".to_string(), ..Default::default() },
                    ],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }
    }

    fn job() -> Job {
        let mut job = Job::new(
            "mpi",
            JobSpec {
                scheduler_name: "volcano".to_string(),
                tasks: vec![task("master"), task("worker")],
                ..Default::default()
            },
        );
        job.metadata.namespace = Some("ml".to_string());
        job.metadata.uid = Some("3f1c".to_string());
        job.status = Some(JobStatus {
            version: 4,
            ..Default::default()
        });
        job
    }

    fn volume(name: &str, path: &str) -> VolumeSpec {
        VolumeSpec {
            mount_path: path.to_string(),
            volume_claim_name: name.to_string(),
            volume_claim: None,
        }
    }

    #[test]
    fn test_pod_identity_and_metadata() {
        let job = job();
        let pod = create_job_pod(&job, &job.spec.tasks[1], 1);

        assert_eq!(pod.metadata.name.as_deref(), Some("mpi-worker-1"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("ml"));

        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.api_version, "batch.volcano.sh/v1alpha1");
        assert_eq!(owner.uid, "3f1c");
        assert_eq!(owner.controller, Some(true));
        assert!(is_job_pod(&pod));

        let annotations = pod.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[TASK_SPEC_KEY], "worker");
        assert_eq!(annotations[JOB_NAME_KEY], "mpi");
        assert_eq!(annotations[GROUP_NAME_ANNOTATION_KEY], "mpi");
        assert_eq!(annotations[JOB_VERSION_KEY], "4");

        let labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["app"], "mpi");
        assert_eq!(labels[JOB_NAME_KEY], "mpi");
        assert_eq!(labels[JOB_NAMESPACE_KEY], "ml");
    }

    #[test]
    fn test_build_is_deterministic_and_leaves_template_untouched() {
        let mut job = job();
        job.spec.volumes = vec![volume("data", "/data")];
        let template_before = job.spec.tasks[0].template.clone();

        let first = create_job_pod(&job, &job.spec.tasks[0], 0);
        let second = create_job_pod(&job, &job.spec.tasks[0], 0);

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(job.spec.tasks[0].template, template_before);
    }

    #[test]
    fn test_names_do_not_collide_across_tasks() {
        let job = job();
        let master = create_job_pod(&job, &job.spec.tasks[0], 0);
        let worker = create_job_pod(&job, &job.spec.tasks[1], 0);
        assert_ne!(master.metadata.name, worker.metadata.name);
    }

    #[test]
    fn test_scheduler_name_inheritance() {
        let mut job = job();
        let pod = create_job_pod(&job, &job.spec.tasks[0], 0);
        assert_eq!(pod.spec.unwrap().scheduler_name.as_deref(), Some("volcano"));

        job.spec.tasks[0].template.spec.as_mut().unwrap().scheduler_name = Some("custom".to_string());
        let pod = create_job_pod(&job, &job.spec.tasks[0], 0);
        assert_eq!(pod.spec.unwrap().scheduler_name.as_deref(), Some("custom"));
    }

    #[test]
    fn test_duplicate_claims_are_injected_once() {
        let mut job = job();
        job.spec.volumes = vec![volume("data", "/data"), volume("data", "/other"), volume("logs", "/logs")];

        let spec = create_job_pod(&job, &job.spec.tasks[0], 0).spec.unwrap();
        let volumes: Vec<&str> = spec.volumes.iter().flatten().map(|v| v.name.as_str()).collect();
        assert_eq!(volumes, vec!["data", "logs"]);

        for container in &spec.containers {
            let mounts: Vec<(&str, &str)> = container
                .volume_mounts
                .iter()
                .flatten()
                .map(|m| (m.name.as_str(), m.mount_path.as_str()))
                .collect();
            assert_eq!(mounts, vec![("data", "/data"), ("logs", "/logs")]);
        }
    }

    #[test]
    fn test_empty_dir_backed_claims() {
        let mut job = job();
        let mut with_claim = volume("cache", "/cache");
        with_claim.volume_claim = Some(PersistentVolumeClaimSpec::default());
        job.spec.volumes = vec![volume("scratch", "/scratch"), with_claim, volume("data", "/data")];
        let status = job.status.as_mut().unwrap();
        status
            .controlled_resources
            .insert("volume-emptyDir-scratch".to_string(), "scratch".to_string());
        status
            .controlled_resources
            .insert("volume-emptyDir-cache".to_string(), "cache".to_string());

        let spec = create_job_pod(&job, &job.spec.tasks[0], 0).spec.unwrap();
        let volumes = spec.volumes.unwrap();

        assert!(volumes[0].empty_dir.is_some());
        assert!(volumes[0].persistent_volume_claim.is_none());
        assert_eq!(volumes[1].persistent_volume_claim.as_ref().unwrap().claim_name, "cache");
        assert_eq!(volumes[2].persistent_volume_claim.as_ref().unwrap().claim_name, "data");
    }

    #[test]
    fn test_template_volume_is_not_duplicated() {
        let mut job = job();
        job.spec.volumes = vec![volume("data", "/data")];
        job.spec.tasks[0].template.spec.as_mut().unwrap().volumes = Some(vec![Volume {
            name: "data".to_string(),
            ..Default::default()
        }]);

        let spec = create_job_pod(&job, &job.spec.tasks[0], 0).spec.unwrap();
        assert_eq!(spec.volumes.unwrap().len(), 1);
    }

    #[test]
    fn test_unnamed_template_uses_default_task_spec() {
        let mut job = job();
        job.spec.tasks[0].template.metadata = None;
        let pod = create_job_pod(&job, &job.spec.tasks[0], 0);
        assert_eq!(pod.metadata.annotations.unwrap()[TASK_SPEC_KEY], DEFAULT_TASK_SPEC);
        assert_eq!(pod.metadata.name.as_deref(), Some("mpi-master-0"));
    }

    #[test]
    fn test_is_controlled_by_requires_controller_flag() {
        let job = job();
        let mut reference = job_owner_reference(&job);
        reference.controller = Some(false);
        let meta = ObjectMeta {
            owner_references: Some(vec![reference]),
            ..Default::default()
        };
        assert!(!is_controlled_by(&meta, "batch.volcano.sh/v1alpha1", "Job"));
        assert!(!is_controlled_by(&ObjectMeta::default(), "batch.volcano.sh/v1alpha1", "Job"));
    }
}
