use std::fmt;

use tracing::{debug, info};

use crate::crd::{Action, Event, Job, LifecyclePolicy};

/// A single unit of reconciliation input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub namespace: String,
    pub job_name: String,
    pub task_name: Option<String>,
    pub event: Option<Event>,
    pub exit_code: Option<i32>,
    pub action: Option<Action>,
    /// Job version the request was observed at
    pub job_version: i32,
}

impl Request {
    pub fn new(namespace: impl Into<String>, job_name: impl Into<String>, job_version: i32) -> Self {
        Self {
            namespace: namespace.into(),
            job_name: job_name.into(),
            job_version,
            ..Default::default()
        }
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_task(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job: {}/{}, Task: {}, Event: {}, ExitCode: {}, Action: {}, JobVersion: {}",
            self.namespace,
            self.job_name,
            self.task_name.as_deref().unwrap_or(""),
            self.event.map(|e| e.as_str()).unwrap_or(""),
            self.exit_code.map(|c| c.to_string()).unwrap_or_default(),
            self.action.map(|a| a.as_str()).unwrap_or(""),
            self.job_version,
        )
    }
}

/// Resolves the action to execute for `req` against `job`.
///
/// An explicit action always wins. Out-of-sync and stale requests resolve to
/// `SyncJob`. Otherwise the policies of the named task are checked first,
/// then the job level policies, in declaration order; the first match wins.
/// Falls back to `SyncJob` when nothing matches.
pub fn apply_policies(job: &Job, req: &Request) -> Action {
    if let Some(action) = req.action {
        return action;
    }

    if req.event == Some(Event::OutOfSync) {
        return Action::SyncJob;
    }

    if req.job_version < job.version() {
        info!("Request {} is outdated, will perform sync instead.", req);
        return Action::SyncJob;
    }

    if let Some(task) = req.task_name.as_deref().and_then(|name| job.task(name)) {
        if let Some(action) = match_policies(&task.policies, req) {
            debug!("Task {} policy matched request {}: {}", task.name, req, action);
            return action;
        }
    }

    if let Some(action) = match_policies(&job.spec.policies, req) {
        debug!("Job policy matched request {}: {}", req, action);
        return action;
    }

    Action::SyncJob
}

fn match_policies(policies: &[LifecyclePolicy], req: &Request) -> Option<Action> {
    policies
        .iter()
        .find(|policy| policy_matches(policy, req))
        .map(|policy| policy.action)
}

fn policy_matches(policy: &LifecyclePolicy, req: &Request) -> bool {
    if let Some(event) = req.event {
        let events = policy.event_list();
        if events.contains(&event) || events.contains(&Event::AnyEvent) {
            return true;
        }
    }

    matches!((policy.exit_code, req.exit_code), (Some(expected), Some(actual)) if expected == actual)
}
