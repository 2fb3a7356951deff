use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "batch.volcano.sh",
    version = "v1alpha1",
    kind = "Job",
    namespaced,
    status = "JobStatus",
    shortname = "vcjob"
)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Scheduler used for pods whose template does not name one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scheduler_name: String,

    /// Minimum number of pods that must run for the job to be considered running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,

    /// Volume claims mounted into every pod of the job
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,

    /// Tasks of the job, in declaration order
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,

    /// Job level lifecycle policies
    #[serde(default)]
    pub policies: Vec<LifecyclePolicy>,

    /// Pod decorators enabled for this job, keyed by plugin name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Path the claim is mounted at inside each container
    pub mount_path: String,

    /// Name of the persistent volume claim
    pub volume_claim_name: String,

    /// Inline claim spec; when present the claim is never backed by an empty dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim: Option<PersistentVolumeClaimSpec>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,

    /// Total number of pods for this task
    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,

    /// Higher priority tasks are materialized first
    #[serde(default)]
    pub priority: i32,

    pub template: PodTemplateSpec,

    /// Task level policies, checked before the job level ones
    #[serde(default)]
    pub policies: Vec<LifecyclePolicy>,
}

/// A rule mapping an event set or an exit code onto an action.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclePolicy {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,

    /// Zero is a valid code; an absent value never matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl LifecyclePolicy {
    /// Explicit event list with the singular `event` appended.
    pub fn event_list(&self) -> Vec<Event> {
        let mut events = self.events.clone();
        if let Some(event) = self.event {
            events.push(event);
        }
        events
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
pub enum Event {
    #[serde(rename = "*")]
    AnyEvent,
    PodFailed,
    PodEvicted,
    Unknown,
    OutOfSync,
    CommandIssued,
    TaskCompleted,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::AnyEvent => "*",
            Event::PodFailed => "PodFailed",
            Event::PodEvicted => "PodEvicted",
            Event::Unknown => "Unknown",
            Event::OutOfSync => "OutOfSync",
            Event::CommandIssued => "CommandIssued",
            Event::TaskCompleted => "TaskCompleted",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
pub enum Action {
    AbortJob,
    RestartJob,
    RestartTask,
    TerminateJob,
    CompleteJob,
    ResumeJob,
    SyncJob,
    EnqueueJob,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::AbortJob => "AbortJob",
            Action::RestartJob => "RestartJob",
            Action::RestartTask => "RestartTask",
            Action::TerminateJob => "TerminateJob",
            Action::CompleteJob => "CompleteJob",
            Action::ResumeJob => "ResumeJob",
            Action::SyncJob => "SyncJob",
            Action::EnqueueJob => "EnqueueJob",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash, JsonSchema)]
pub enum JobPhase {
    #[default]
    Pending,
    Inqueue,
    Aborting,
    Aborted,
    Running,
    Restarting,
    Completing,
    Completed,
    Terminating,
    Terminated,
    Failed,
}

impl JobPhase {
    /// Phases after which the job no longer creates pods on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Failed | JobPhase::Terminated | JobPhase::Aborted
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
pub enum JobConditionType {
    Created,
    Scheduled,
    Succeeded,
    Stopped,
    Restarting,
}

impl fmt::Display for JobConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub condition_type: JobConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_update_time: Time,
    pub last_transition_time: Time,
}

impl JobCondition {
    pub fn is_active(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    #[serde(default)]
    pub phase: JobPhase,

    /// Condition history, at most one entry per type, in update order
    #[serde(default)]
    pub conditions: Vec<JobCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,

    /// Generation counter bumped whenever the job is restarted
    #[serde(default)]
    pub version: i32,

    /// Markers for resources the controller created on behalf of the job
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub controlled_resources: BTreeMap<String, String>,

    /// Resources needed to run `minAvailable` pods, read by the batch
    /// scheduler for gang admission
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub min_resources: BTreeMap<String, Quantity>,

    #[serde(default)]
    pub pending: i32,
    #[serde(default)]
    pub running: i32,
    #[serde(default)]
    pub succeeded: i32,
    #[serde(default)]
    pub failed: i32,
}

impl Job {
    pub fn version(&self) -> i32 {
        self.status.as_ref().map(|s| s.version).unwrap_or_default()
    }

    pub fn phase(&self) -> JobPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.spec.tasks.iter().find(|t| t.name == name)
    }

    /// Sum of replicas across all tasks.
    pub fn total_replicas(&self) -> i32 {
        self.spec.tasks.iter().map(|t| t.replicas).sum()
    }

    /// Explicit `minAvailable`, or every replica when unset.
    pub fn min_available(&self) -> i32 {
        self.spec.min_available.unwrap_or_else(|| self.total_replicas())
    }
}
