//! Keeps the CA bundle of the admission webhook configurations current.
//!
//! The configuration is fetched, the bundle set on the named webhook entry,
//! and a JSON merge patch between the two snapshots is sent only when it is
//! not empty, so repeated calls with the same bundle are no-ops.

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::ByteString;
use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{Error, Result};

/// Read and patch access to webhook configurations of one kind.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookConfigStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Value>;

    async fn patch(&self, name: &str, patch: &Value) -> Result<()>;
}

/// A webhook configuration whose entries carry a client CA bundle.
pub trait WebhookConfiguration: Serialize + DeserializeOwned {
    /// Sets the bundle on entry `webhook_name`; false if there is no such entry.
    fn set_ca_bundle(&mut self, webhook_name: &str, ca_bundle: &[u8]) -> bool;
}

macro_rules! impl_webhook_configuration {
    ($($kind:ty),* $(,)?) => {
        $(
            impl WebhookConfiguration for $kind {
                fn set_ca_bundle(&mut self, webhook_name: &str, ca_bundle: &[u8]) -> bool {
                    match self
                        .webhooks
                        .iter_mut()
                        .flatten()
                        .find(|w| w.name == webhook_name)
                    {
                        Some(webhook) => {
                            webhook.client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
                            true
                        }
                        None => false,
                    }
                }
            }
        )*
    };
}

impl_webhook_configuration!(MutatingWebhookConfiguration, ValidatingWebhookConfiguration);

/// Patches `ca_bundle` into webhook `webhook_name` of configuration
/// `config_name`. Returns whether a patch was sent.
pub async fn patch_ca_bundle<C: WebhookConfiguration>(
    store: &dyn WebhookConfigStore,
    config_name: &str,
    webhook_name: &str,
    ca_bundle: &[u8],
) -> Result<bool> {
    let mut config: C = serde_json::from_value(store.get(config_name).await?)?;
    let before = serde_json::to_value(&config)?;

    if !config.set_ca_bundle(webhook_name, ca_bundle) {
        return Err(Error::Internal(format!(
            "webhook entry \"{}\" not found in config \"{}\"",
            webhook_name, config_name
        )));
    }
    let after = serde_json::to_value(&config)?;

    let patch = create_merge_patch(&before, &after);
    if is_empty_patch(&patch) {
        debug!("CA bundle of {}/{} already up to date", config_name, webhook_name);
        return Ok(false);
    }

    store.patch(config_name, &patch).await?;
    info!("Patched CA bundle into webhook {}/{}", config_name, webhook_name);
    Ok(true)
}

/// JSON merge patch (RFC 7386) that turns `original` into `modified`.
///
/// Objects are diffed key by key; removed keys map to `null`. Any other
/// differing value, arrays included, is replaced whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();
            for (key, value) in modified {
                match original.get(key) {
                    Some(previous) if previous == value => {}
                    Some(previous @ Value::Object(_)) if value.is_object() => {
                        patch.insert(key.clone(), create_merge_patch(previous, value));
                    }
                    _ => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in original.keys() {
                if !modified.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

pub fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().map(|o| o.is_empty()).unwrap_or(false)
}

/// `WebhookConfigStore` over the cluster-scoped configuration kind `K`.
pub struct KubeWebhookStore<K> {
    api: Api<K>,
}

impl KubeWebhookStore<MutatingWebhookConfiguration> {
    pub fn mutating(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

impl KubeWebhookStore<ValidatingWebhookConfiguration> {
    pub fn validating(client: Client) -> Self {
        Self { api: Api::all(client) }
    }
}

#[async_trait]
impl<K> WebhookConfigStore for KubeWebhookStore<K>
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, name: &str) -> Result<Value> {
        let config = self.api.get(name).await?;
        Ok(serde_json::to_value(config)?)
    }

    async fn patch(&self, name: &str, patch: &Value) -> Result<()> {
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}
