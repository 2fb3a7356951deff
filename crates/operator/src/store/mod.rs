mod kube_store;

pub use kube_store::KubeStore;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};

use crate::crd::{Job, JobStatus};

/// Access to the Job, Pod and plugin resources the controller reconciles. Jobs
/// themselves are read from the controller's watch cache.
///
/// Errors surface as `Error::NotFound`, `Error::Conflict` or
/// `Error::Kubernetes` for anything transient.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Pods labelled as belonging to the job.
    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> crate::Result<Vec<Pod>>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> crate::Result<Pod>;

    /// Deleting a pod that no longer exists is not an error.
    async fn delete_pod(&self, namespace: &str, name: &str) -> crate::Result<()>;

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> crate::Result<()>;

    async fn create_service(&self, namespace: &str, service: &Service) -> crate::Result<()>;

    async fn patch_job_status(
        &self,
        namespace: &str,
        name: &str,
        status: &JobStatus,
    ) -> crate::Result<Job>;
}
