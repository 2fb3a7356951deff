pub mod job;

pub use job::{
    Action, ConditionStatus, Event, Job, JobCondition, JobConditionType, JobPhase, JobSpec,
    JobStatus, LifecyclePolicy, TaskSpec, VolumeSpec,
};

/// Annotation carrying the template name a pod was built from.
pub const TASK_SPEC_KEY: &str = "volcano.sh/task-spec";
/// Annotation and label carrying the owning job's name.
pub const JOB_NAME_KEY: &str = "volcano.sh/job-name";
/// Label carrying the owning job's namespace.
pub const JOB_NAMESPACE_KEY: &str = "volcano.sh/job-namespace";
/// Annotation carrying the job version the pod was built against.
pub const JOB_VERSION_KEY: &str = "volcano.sh/job-version";
/// Pod group annotation read by the batch scheduler.
pub const GROUP_NAME_ANNOTATION_KEY: &str = "scheduling.k8s.io/group-name";

/// Task spec key used when a pod template carries no name.
pub const DEFAULT_TASK_SPEC: &str = "default";

/// Prefix of the controlled-resource marker for claims backed by an empty dir.
pub const EMPTY_DIR_VOLUME_PREFIX: &str = "volume-emptyDir-";

/// Prefix of the controlled-resource marker recorded once a plugin's job
/// resources exist.
pub const PLUGIN_MARKER_PREFIX: &str = "plugin-";
