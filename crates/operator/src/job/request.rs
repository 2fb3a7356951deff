use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{
    crd::{Event, Job, TaskSpec, JOB_VERSION_KEY, TASK_SPEC_KEY},
    job::policy::Request,
};

const POD_FAILED: &str = "Failed";
const POD_SUCCEEDED: &str = "Succeeded";
const EVICTED_REASON: &str = "Evicted";

/// Job version a pod was built against, or `None` for pods without a
/// parsable version annotation.
pub fn pod_version(pod: &Pod) -> Option<i32> {
    pod.annotations().get(JOB_VERSION_KEY)?.parse().ok()
}

pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Pending")
}

/// Name of the task `pod` belongs to.
///
/// A task spec annotation naming a template or a task wins. Otherwise the
/// task is read off the pod name, which is always `{job}-{task}-{index}`.
pub fn pod_task_name(job: &Job, pod: &Pod) -> Option<String> {
    let by_annotation = pod.annotations().get(TASK_SPEC_KEY).and_then(|key| {
        job.spec
            .tasks
            .iter()
            .find(|t| t.template.metadata.as_ref().and_then(|m| m.name.as_ref()) == Some(key))
            .or_else(|| job.task(key))
    });

    by_annotation
        .or_else(|| task_from_pod_name(job, &pod.name_any()))
        .map(|t| t.name.clone())
}

fn task_from_pod_name<'a>(job: &'a Job, pod_name: &str) -> Option<&'a TaskSpec> {
    let rest = pod_name.strip_prefix(&job.name_any())?.strip_prefix('-')?;
    job.spec.tasks.iter().find(|task| {
        rest.strip_prefix(task.name.as_str())
            .and_then(|index| index.strip_prefix('-'))
            .map(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
    })
}

/// First non-zero exit code among terminated containers.
fn pod_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.terminated.as_ref())
        .map(|t| t.exit_code)
        .find(|code| *code != 0)
}

/// Builds the request this reconciliation pass acts on.
///
/// Pods are visited by name. The first failed or evicted pod yields a
/// `PodFailed` / `PodEvicted` request carrying its task, exit code and the
/// job version it was built against. Otherwise a task whose replicas have
/// all succeeded yields `TaskCompleted`. With nothing to report the request
/// is a plain sync at the current job version.
pub fn request_from_pods(job: &Job, pods: &[Pod]) -> Request {
    let namespace = job.namespace().unwrap_or_default();
    let current = Request::new(namespace.clone(), job.name_any(), job.version());

    let mut sorted: Vec<&Pod> = pods.iter().collect();
    sorted.sort_by_key(|p| p.name_any());

    for pod in &sorted {
        let evicted = pod
            .status
            .as_ref()
            .and_then(|s| s.reason.as_deref())
            .map(|r| r == EVICTED_REASON)
            .unwrap_or(false);
        if pod_phase(pod) != POD_FAILED && !evicted {
            continue;
        }

        let mut req = Request::new(
            namespace.clone(),
            job.name_any(),
            pod_version(pod).unwrap_or_else(|| job.version()),
        )
        .with_event(if evicted { Event::PodEvicted } else { Event::PodFailed });
        req.task_name = pod_task_name(job, pod);
        req.exit_code = pod_exit_code(pod);
        return req;
    }

    for task in &job.spec.tasks {
        if task.replicas <= 0 {
            continue;
        }
        let succeeded = sorted
            .iter()
            .filter(|p| pod_phase(p) == POD_SUCCEEDED)
            .filter(|p| pod_version(p) == Some(job.version()))
            .filter(|p| pod_task_name(job, p).as_deref() == Some(task.name.as_str()))
            .count();
        if succeeded >= task.replicas as usize {
            return current.with_event(Event::TaskCompleted).with_task(task.name.clone());
        }
    }

    current
}
