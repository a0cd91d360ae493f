//! Hodie server binary.

use anyhow::{Context, Result};
use hodie_core::config::AppConfig;
use hodie_quota::SystemClock;
use hodie_server::ai::HttpAiGateway;
use hodie_server::auth::StaticTokenVerifier;
use hodie_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hodie - tenant-scoped quota and access control for AI and uploads
#[derive(Parser, Debug)]
#[command(name = "hodied")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HODIE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

const ENV_PREFIX: &str = "HODIE_";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hodie v{}", env!("CARGO_PKG_VERSION"));

    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with(ENV_PREFIX) && key != "HODIE_CONFIG");
    let config = load_config(&args.config, has_env_config)?;

    for warning in config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?
    {
        tracing::warn!("{warning}");
    }

    hodie_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = hodie_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = hodie_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!(backend = metadata.backend_name(), "Metadata store ready");

    let verifier = StaticTokenVerifier::from_config(&config.auth);
    if verifier.is_empty() {
        tracing::warn!("No client tokens configured; only the admin and health endpoints are usable");
    } else {
        tracing::info!(tokens = verifier.len(), "Client token verifier loaded");
    }

    let ai = HttpAiGateway::new(config.ai.clone()).context("failed to build AI HTTP client")?;

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = AppState::new(
        config,
        storage,
        metadata,
        Arc::new(verifier),
        Arc::new(ai),
        Arc::new(SystemClock),
    );
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Load configuration from the TOML file (optional) overlaid with
/// `HODIE_`-prefixed environment variables (`__` separates sections).
fn load_config(path: &str, has_env_config: bool) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let has_config_file = config_path.exists();

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: hodied --config /path/to/config.toml\n  \
             2. Environment variables: HODIE_SERVER__BIND=0.0.0.0:8080 \
             HODIE_ADMIN__TOKEN_HASH=YOUR_TOKEN_HASH_HERE hodied\n\n\
             See config/server.example.toml for example configuration.\n\
             Set HODIE_CONFIG env var to specify a default config file path."
        );
    }

    let mut figment = Figment::new();
    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!("Using environment variables for configuration");
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
