use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub controller: ControllerConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Scheduler for jobs that do not name one.
    pub scheduler_name: String,
    /// Restricts the controller to one namespace; all namespaces when unset.
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    pub mutate_config_name: String,
    pub mutate_webhook_name: String,
    pub validate_config_name: String,
    pub validate_webhook_name: String,
    /// PEM bundle patched into both webhook configurations at startup.
    pub ca_cert_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Config {
            server: ServerConfig {
                addr: var("SERVER_ADDR", &defaults.server.addr),
            },
            controller: ControllerConfig {
                scheduler_name: var("SCHEDULER_NAME", &defaults.controller.scheduler_name),
                namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            },
            webhook: WebhookConfig {
                mutate_config_name: var(
                    "MUTATE_WEBHOOK_CONFIG_NAME",
                    &defaults.webhook.mutate_config_name,
                ),
                mutate_webhook_name: var("MUTATE_WEBHOOK_NAME", &defaults.webhook.mutate_webhook_name),
                validate_config_name: var(
                    "VALIDATE_WEBHOOK_CONFIG_NAME",
                    &defaults.webhook.validate_config_name,
                ),
                validate_webhook_name: var(
                    "VALIDATE_WEBHOOK_NAME",
                    &defaults.webhook.validate_webhook_name,
                ),
                ca_cert_file: lookup("CA_CERT_FILE")
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from),
            },
        };

        if config.controller.scheduler_name.is_empty() {
            return Err(Error::Config("SCHEDULER_NAME must not be empty".to_string()));
        }
        if config.webhook.ca_cert_file.is_none() {
            tracing::warn!("CA_CERT_FILE is not set. Webhook CA bundles will not be patched.");
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            controller: ControllerConfig {
                scheduler_name: "volcano".to_string(),
                namespace: None,
            },
            webhook: WebhookConfig {
                mutate_config_name: "volcano-mutate-job".to_string(),
                mutate_webhook_name: "mutatejob.volcano.sh".to_string(),
                validate_config_name: "volcano-validate-job".to_string(),
                validate_webhook_name: "validatejob.volcano.sh".to_string(),
                ca_cert_file: None,
            },
        }
    }
}
