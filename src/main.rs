//! Vault Bootstrap - Cluster Initialization and Unseal Orchestrator
//!
//! Runs as a one-shot Kubernetes job, as a self-healing sidecar next to a
//! member, or as a plain HTTP liveness check.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vault_bootstrap::bootstrap::{Bootstrap, Sidecar};
use vault_bootstrap::cluster::{Cluster, ClusterMember};
use vault_bootstrap::config::{BootstrapConfig, LoggingConfig};
use vault_bootstrap::platform::ServiceAccountIdentity;
use vault_bootstrap::secrets::KubernetesSecretStore;

/// Exit code of `check` when the service answers with a failure status
const CHECK_DOWN_EXIT: u8 = 99;

/// Vault Bootstrap - Cluster Initialization and Unseal Orchestrator
#[derive(Parser)]
#[command(name = "vault-bootstrap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full bootstrap pipeline once
    Job,

    /// Keep the local member unsealed
    Sidecar,

    /// Probe an HTTP endpoint and exit with its verdict
    Check {
        /// URL to query
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging comes first so that configuration fallbacks are reported
    let logging = LoggingConfig::from_env(|key| std::env::var(key).ok());
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), logging.is_json());

    let config = match BootstrapConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command.unwrap_or(Commands::Job) {
        Commands::Job => run_job(config).await,
        Commands::Sidecar => run_sidecar(config).await,
        Commands::Check { url } => return run_check(&url, &config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Run the bootstrap pipeline against the configured cluster
async fn run_job(config: BootstrapConfig) -> anyhow::Result<()> {
    tracing::info!("Starting Vault bootstrap");

    let cluster = Cluster::from_config(&config).context("failed to set up cluster clients")?;
    let identity = Arc::new(ServiceAccountIdentity::from_settings(&config.auth));

    let stages = &config.stages;
    let needs_store = stages.persist_secrets || stages.unseal || stages.configure_auth;
    let store = if needs_store {
        let namespace = config.namespace();
        let api = config.kubernetes_api()?;
        let store = KubernetesSecretStore::in_cluster(api, &namespace, config.request_timeout())
            .context("failed to set up the Kubernetes secret store")?;
        tracing::info!("Secrets are kept in namespace {}", namespace);
        Some(Arc::new(store))
    } else {
        None
    };

    let mut bootstrap = Bootstrap::new(config, cluster, identity);
    if let Some(store) = store {
        bootstrap = bootstrap.with_store(store);
    }

    let report = bootstrap.run().await.context("bootstrap failed")?;
    tracing::info!("Bootstrap complete: {}", report);
    Ok(())
}

/// Re-unseal the local member forever
async fn run_sidecar(config: BootstrapConfig) -> anyhow::Result<()> {
    let member = ClusterMember::connect(&config.sidecar.address, &config)
        .context("failed to set up the member client")?;
    let namespace = config.namespace();
    let store = KubernetesSecretStore::in_cluster(config.kubernetes_api()?, &namespace, config.request_timeout())
        .context("failed to set up the Kubernetes secret store")?;

    let sidecar = Sidecar::new(member, Arc::new(store), &config);
    sidecar.run().await.context("sidecar stopped")?;
    Ok(())
}

/// Query `url` once: 0 when it answers 2xx/3xx, 99 otherwise, 1 when unreachable
async fn run_check(url: &str, config: &BootstrapConfig) -> ExitCode {
    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(config.cluster.tls_skip_verify)
        .timeout(config.request_timeout())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match client.get(url).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_success() || status.is_redirection() {
                tracing::info!("Service UP. Status code: {}", status.as_u16());
                ExitCode::SUCCESS
            } else {
                tracing::error!("Service DOWN. Status code: {}", status.as_u16());
                ExitCode::from(CHECK_DOWN_EXIT)
            }
        }
        Err(e) => {
            tracing::error!("Service unreachable: {}", e);
            ExitCode::FAILURE
        }
    }
}
