use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ResourceExt},
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Client,
};
use tracing::{debug, error, info, warn};

use crate::{
    crd::{Job, JobStatus, PLUGIN_MARKER_PREFIX},
    job::{
        apply_policies, min_resources, plan, pod::is_job_pod, request_from_pods,
        update_job_phase, JobPlugin, PluginRegistry, PluginResource,
    },
    metrics::{
        ACTIONS_RESOLVED_TOTAL, PODS_CREATED_TOTAL, PODS_DELETED_TOTAL, RECONCILIATIONS_TOTAL,
    },
    store::ResourceStore,
    Error, Result,
};

/// State shared by every reconciliation pass.
pub struct Context {
    pub store: Arc<dyn ResourceStore>,
    pub plugins: PluginRegistry,
    /// Scheduler for jobs that do not name one.
    pub scheduler_name: String,
}

pub struct JobController {
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
}

impl JobController {
    pub fn new(client: Client, namespace: Option<String>, ctx: Context) -> Self {
        Self {
            client,
            namespace,
            ctx: Arc::new(ctx),
        }
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "Starting Job controller (namespace: {})",
            self.namespace.as_deref().unwrap_or("all")
        );

        let (jobs, pods): (Api<Job>, Api<Pod>) = match &self.namespace {
            Some(ns) => (
                Api::namespaced(self.client.clone(), ns),
                Api::namespaced(self.client.clone(), ns),
            ),
            None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
        };

        Controller::new(jobs, Config::default())
            .owns(pods, Config::default())
            .run(Self::reconcile, Self::error_policy, self.ctx)
            .for_each(|res| async move {
                match res {
                    Ok((job, _action)) => debug!("Reconciled Job {}", job.name),
                    Err(e) => error!("Reconciliation error: {}", e),
                }
            })
            .await;

        Ok(())
    }

    async fn reconcile(job: Arc<Job>, ctx: Arc<Context>) -> Result<Action> {
        let status = reconcile_job(&ctx, &job).await?;

        if status.phase.is_terminal() {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(Duration::from_secs(300)))
        }
    }

    fn error_policy(job: Arc<Job>, err: &Error, _ctx: Arc<Context>) -> Action {
        if err.is_conflict() {
            warn!("Job {} was modified concurrently, retrying", job.name_any());
            return Action::requeue(Duration::from_secs(1));
        }
        error!("Error processing Job {}: {}", job.name_any(), err);
        Action::requeue(Duration::from_secs(30))
    }
}

/// One reconciliation pass over `job`.
///
/// Derives the request from the job's pods, resolves it to an action,
/// applies the planned pod changes and writes the resulting status. The
/// pass is safe to re-run from scratch after a conflict. Returns the status
/// that was recorded.
pub async fn reconcile_job(ctx: &Context, job: &Job) -> Result<JobStatus> {
    let namespace = job.namespace().unwrap_or_default();
    let name = job.name_any();
    RECONCILIATIONS_TOTAL.inc();

    let mut job = job.clone();
    if job.spec.scheduler_name.is_empty() {
        job.spec.scheduler_name = ctx.scheduler_name.clone();
    }

    let pods: Vec<Pod> = ctx
        .store
        .list_job_pods(&namespace, &name)
        .await?
        .into_iter()
        .filter(is_job_pod)
        .collect();

    let req = request_from_pods(&job, &pods);
    let action = apply_policies(&job, &req);
    ACTIONS_RESOLVED_TOTAL
        .with_label_values(&[action.as_str()])
        .inc();
    info!("Job {}/{}: {} resolved to {}", namespace, name, req, action);

    let plugins = ctx.plugins.plugins_for(&job);
    let sync_plan = plan(&job, &pods, action, &req, &plugins)?;
    let mut status = job.status.clone().unwrap_or_default();

    for pod_name in &sync_plan.delete {
        ctx.store.delete_pod(&namespace, pod_name).await?;
        PODS_DELETED_TOTAL.inc();
        debug!("Deleted pod {}/{}", namespace, pod_name);
    }

    if !sync_plan.create.is_empty() {
        ensure_plugin_resources(ctx, &job, &plugins, &mut status).await?;
    }

    for pod in &sync_plan.create {
        let pod_name = pod.name_any();
        match ctx.store.create_pod(&namespace, pod).await {
            Ok(_) => {
                PODS_CREATED_TOTAL.inc();
                debug!("Created pod {}/{}", namespace, pod_name);
            }
            Err(Error::Conflict(_)) => debug!("Pod {}/{} already exists", namespace, pod_name),
            Err(e) => return Err(e),
        }
    }

    if sync_plan.bump_version {
        status.version += 1;
        info!("Job {}/{} moved to version {}", namespace, name, status.version);
    }
    update_job_phase(&mut status, sync_plan.phase, &sync_plan.message);
    status.pending = sync_plan.counts.pending;
    status.running = sync_plan.counts.running;
    status.succeeded = sync_plan.counts.succeeded;
    status.failed = sync_plan.counts.failed;
    match min_resources(&job) {
        Ok(resources) => status.min_resources = resources,
        Err(e) => warn!("Job {}/{} has unparsable resources: {}", namespace, name, e),
    }

    if job.status.as_ref() == Some(&status) {
        debug!("Job {}/{} status unchanged", namespace, name);
        return Ok(status);
    }

    ctx.store.patch_job_status(&namespace, &name, &status).await?;
    info!("Job {}/{} is {}", namespace, name, status.phase);
    Ok(status)
}

/// Creates the job level resources of every plugin that has not yet done
/// so, recording a `plugin-<name>` marker in `status` for each.
async fn ensure_plugin_resources(
    ctx: &Context,
    job: &Job,
    plugins: &[Box<dyn JobPlugin>],
    status: &mut JobStatus,
) -> Result<()> {
    let namespace = job.namespace().unwrap_or_default();

    for plugin in plugins {
        let marker = format!("{}{}", PLUGIN_MARKER_PREFIX, plugin.name());
        if status.controlled_resources.get(&marker).map(String::as_str) == Some(plugin.name()) {
            continue;
        }

        for resource in plugin.on_job_add(job)? {
            let created = match &resource {
                PluginResource::ConfigMap(config_map) => {
                    ctx.store.create_config_map(&namespace, config_map).await
                }
                PluginResource::Service(service) => ctx.store.create_service(&namespace, service).await,
            };
            match created {
                Ok(()) => info!(
                    "Created {} {}/{} for plugin {}",
                    resource.kind(),
                    namespace,
                    resource.name(),
                    plugin.name()
                ),
                Err(Error::Conflict(_)) => debug!(
                    "{} {}/{} already exists",
                    resource.kind(),
                    namespace,
                    resource.name()
                ),
                Err(e) => return Err(e),
            }
        }

        status
            .controlled_resources
            .insert(marker, plugin.name().to_string());
    }
    Ok(())
}
