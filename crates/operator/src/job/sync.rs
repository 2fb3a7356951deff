//! Turns a resolved action into the pod changes and phase it implies.
//!
//! Planning is pure: it looks at the job and the pods observed for it and
//! returns a `SyncPlan`. The controller applies the plan through the
//! resource store and records the phase on the job status.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use crate::{
    crd::{Action, Job, JobPhase},
    job::{
        plugins::{decorate, JobPlugin},
        pod::{create_job_pod, make_pod_name},
        policy::Request,
        priority::sort_by_priority,
        request::{pod_phase, pod_task_name, pod_version},
    },
    Result,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodCounts {
    pub pending: i32,
    pub running: i32,
    pub succeeded: i32,
    pub failed: i32,
}

impl PodCounts {
    pub fn from_pods<'a>(pods: impl IntoIterator<Item = &'a Pod>) -> Self {
        let mut counts = Self::default();
        for pod in pods {
            match pod_phase(pod) {
                "Running" => counts.running += 1,
                "Succeeded" => counts.succeeded += 1,
                "Failed" => counts.failed += 1,
                _ => counts.pending += 1,
            }
        }
        counts
    }
}

/// Pod changes and status update implied by one action.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub action: Action,
    pub create: Vec<Pod>,
    /// Names of pods to delete
    pub delete: Vec<String>,
    pub phase: JobPhase,
    pub message: String,
    /// Whether the job version is incremented before the status is written
    pub bump_version: bool,
    pub counts: PodCounts,
}

impl SyncPlan {
    fn new(action: Action, phase: JobPhase, counts: PodCounts) -> Self {
        Self {
            action,
            create: Vec::new(),
            delete: Vec::new(),
            phase,
            message: String::new(),
            bump_version: false,
            counts,
        }
    }
}

/// Plans `action` for `job` given the pods currently owned by it.
pub fn plan(
    job: &Job,
    pods: &[Pod],
    action: Action,
    req: &Request,
    plugins: &[Box<dyn JobPlugin>],
) -> Result<SyncPlan> {
    let counts = PodCounts::from_pods(pods);
    let phase = job.phase();

    let plan = match action {
        Action::SyncJob | Action::EnqueueJob => sync(job, pods, action, phase, counts, plugins)?,
        Action::ResumeJob => {
            let resumed = if phase.is_terminal() { JobPhase::Pending } else { phase };
            sync(job, pods, action, resumed, counts, plugins)?
        }
        Action::RestartJob => {
            let mut plan = SyncPlan::new(action, JobPhase::Restarting, counts);
            plan.delete = all_pod_names(pods);
            plan.bump_version = true;
            plan.message = "Restarting all pods of the job".to_string();
            plan
        }
        Action::RestartTask => {
            let mut plan = SyncPlan::new(action, JobPhase::Restarting, counts);
            match req.task_name.as_deref() {
                Some(task) => {
                    plan.delete = pods
                        .iter()
                        .filter(|p| pod_task_name(job, p).as_deref() == Some(task))
                        .map(|p| p.name_any())
                        .collect();
                    plan.message = format!("Restarting pods of task {}", task);
                }
                None => {
                    plan.delete = all_pod_names(pods);
                    plan.bump_version = true;
                    plan.message = "Restarting all pods of the job".to_string();
                }
            }
            plan
        }
        Action::AbortJob => stop(action, pods, JobPhase::Aborted, counts, "Job aborted"),
        Action::TerminateJob => stop(action, pods, JobPhase::Terminated, counts, "Job terminated"),
        Action::CompleteJob => {
            let mut plan = SyncPlan::new(action, JobPhase::Completed, counts);
            plan.delete = pods
                .iter()
                .filter(|p| !matches!(pod_phase(p), "Succeeded" | "Failed"))
                .map(|p| p.name_any())
                .collect();
            plan.message = "Job completed".to_string();
            plan
        }
    };

    debug!(
        "Planned {} for job {}: {} to create, {} to delete, phase {}",
        plan.action,
        job.name_any(),
        plan.create.len(),
        plan.delete.len(),
        plan.phase
    );
    Ok(plan)
}

fn all_pod_names(pods: &[Pod]) -> Vec<String> {
    pods.iter().map(|p| p.name_any()).collect()
}

fn stop(action: Action, pods: &[Pod], phase: JobPhase, counts: PodCounts, message: &str) -> SyncPlan {
    let mut plan = SyncPlan::new(action, phase, counts);
    plan.delete = all_pod_names(pods);
    plan.message = message.to_string();
    plan
}

/// Creates missing pods, highest priority tasks first, and removes pods from
/// older job versions or beyond a task's replica count.
fn sync(
    job: &Job,
    pods: &[Pod],
    action: Action,
    phase: JobPhase,
    counts: PodCounts,
    plugins: &[Box<dyn JobPlugin>],
) -> Result<SyncPlan> {
    let mut plan = SyncPlan::new(action, phase, counts);
    if phase.is_terminal() {
        plan.message = format!("Job is {}", phase);
        return Ok(plan);
    }

    let job_name = job.name_any();
    let version = job.version();
    let existing: BTreeSet<String> = pods.iter().map(|p| p.name_any()).collect();
    let mut desired = BTreeSet::new();

    for task in sort_by_priority(&job.spec.tasks) {
        for index in 0..task.replicas.max(0) {
            let name = make_pod_name(&job_name, &task.name, index);
            if !existing.contains(&name) {
                let pod = create_job_pod(job, task, index);
                plan.create.push(decorate(plugins, pod, task, job)?);
            }
            desired.insert(name);
        }
    }

    let mut stale_pods = 0;
    for pod in pods {
        let name = pod.name_any();
        let outdated = pod_version(pod).map(|v| v < version).unwrap_or(false);
        if outdated {
            stale_pods += 1;
        }
        if outdated || !desired.contains(&name) {
            plan.delete.push(name);
        }
    }

    let total = job.total_replicas();
    let current = &plan.counts;
    plan.phase = if phase == JobPhase::Restarting && stale_pods > 0 {
        JobPhase::Restarting
    } else if total > 0 && current.succeeded >= total {
        JobPhase::Completed
    } else if current.running > 0 && current.running + current.succeeded >= job.min_available() {
        JobPhase::Running
    } else if phase == JobPhase::Running {
        JobPhase::Running
    } else {
        JobPhase::Pending
    };
    plan.message = format!(
        "{} pending, {} running, {} succeeded, {} failed",
        current.pending, current.running, current.succeeded, current.failed
    );
    Ok(plan)
}
