use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client,
};
use serde_json::json;
use tracing::debug;

use super::ResourceStore;
use crate::{
    crd::{Job, JobStatus, JOB_NAME_KEY},
    Error, Result,
};

/// `ResourceStore` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list_job_pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(&format!("{}={}", JOB_NAME_KEY, job_name));
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        Ok(self.pods(namespace).create(&PostParams::default(), pod).await?)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self.pods(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match Error::from(e) {
                Error::NotFound(_) => {
                    debug!("Pod {}/{} already gone", namespace, name);
                    Ok(())
                }
                other => Err(other),
            },
        }
    }

    async fn create_config_map(&self, namespace: &str, config_map: &ConfigMap) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), service).await?;
        Ok(())
    }

    async fn patch_job_status(&self, namespace: &str, name: &str, status: &JobStatus) -> Result<Job> {
        let patch = json!({ "status": status });
        let job = self
            .jobs(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(job)
    }
}
