pub mod plugins;
pub mod pod;
pub mod policy;
pub mod priority;
pub mod request;
pub mod resources;
pub mod state;
pub mod sync;

pub use plugins::{JobPlugin, PluginRegistry, PluginResource};
pub use pod::{create_job_pod, is_controlled_by, make_pod_name};
pub use policy::{apply_policies, Request};
pub use priority::sort_by_priority;
pub use request::request_from_pods;
pub use resources::{add_resource_list, min_resources, ResourceList};
pub use state::{get_condition, has_condition, new_state_condition, set_condition, update_job_phase};
pub use sync::{plan, SyncPlan};
