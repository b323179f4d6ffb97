mod analysis;
mod api;
mod config;
mod identity;
mod image_store;
mod orchestrator;
mod record_store;

use analysis::GeminiAnalyzer;
use anyhow::{Context, Result};
use api::{start_api_server, AppState};
use config::Config;
use identity::IdentityClient;
use image_store::S3ImageStore;
use orchestrator::FoodLog;
use record_store::PgRecordStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Meallog Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let record_store = Arc::new(
        PgRecordStore::new(&config.database)
            .await
            .context("Failed to initialize record store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        record_store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let image_store = Arc::new(
        S3ImageStore::new(&config.s3)
            .await
            .context("Failed to initialize image store")?,
    );

    let analyzer = Arc::new(
        GeminiAnalyzer::new(&config.analysis).context("Failed to initialize analyzer")?,
    );

    let identity_client = Arc::new(
        IdentityClient::new(&config.identity).context("Failed to initialize identity client")?,
    );

    let food_log = Arc::new(FoodLog::new(
        image_store,
        analyzer,
        record_store.clone(),
        config.s3.key_prefix.clone(),
    ));

    // Create API state
    let api_state = AppState {
        food_log,
        identity: identity_client,
        record_store,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Meallog service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down meallog service");

    api_handle.abort();

    info!("Meallog service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
