use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use kube::{Client, CustomResourceExt};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use batch_job_operator::{
    config::Config,
    controllers::{Context, JobController},
    crd::Job,
    job::PluginRegistry,
    metrics,
    server::Server,
    store::KubeStore,
    webhook::{patch_ca_bundle, KubeWebhookStore},
};

#[derive(Parser)]
#[command(name = "batch-job-operator", version, about = "Reconciles batch Jobs into pods")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and its health/metrics server (default)
    Run,
    /// Print the Job CustomResourceDefinition as YAML
    Crds,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Crds => {
            print!("{}", serde_yaml::to_string(&Job::crd())?);
            Ok(())
        }
        Command::Run => run().await,
    }
}

async fn run() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    metrics::register_metrics()?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    if let Some(path) = &config.webhook.ca_cert_file {
        let ca_bundle = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read CA certificate {}", path.display()))?;

        let mutating = KubeWebhookStore::mutating(client.clone());
        patch_ca_bundle::<MutatingWebhookConfiguration>(
            &mutating,
            &config.webhook.mutate_config_name,
            &config.webhook.mutate_webhook_name,
            &ca_bundle,
        )
        .await?;

        let validating = KubeWebhookStore::validating(client.clone());
        patch_ca_bundle::<ValidatingWebhookConfiguration>(
            &validating,
            &config.webhook.validate_config_name,
            &config.webhook.validate_webhook_name,
            &ca_bundle,
        )
        .await?;
    }

    let server = Server::new(&config);
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Server error: {}", e);
        }
    });

    let controller = JobController::new(
        client.clone(),
        config.controller.namespace.clone(),
        Context {
            store: Arc::new(KubeStore::new(client)),
            plugins: PluginRegistry::with_defaults(),
            scheduler_name: config.controller.scheduler_name.clone(),
        },
    );
    controller.run().await?;

    Ok(())
}
