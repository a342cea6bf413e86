//! Device Advertiser - publishes node device inventory
//!
//! This binary runs as a DaemonSet on each Kubernetes node and
//! periodically writes the node's device annotation.

use anyhow::Result;
use device_advertiser::{api, Advertiser, AdvertiserConfig, AppState, Inventory};
use device_lib::{
    health::{components, HealthRegistry},
    observability::{StructuredLogger, SyncMetrics},
    KubeStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ADVERTISER_VERSION: &str = env!("CARGO_PKG_VERSION");
const FIELD_MANAGER: &str = "device-advertiser";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting device-advertiser");

    let config = AdvertiserConfig::load()?;
    info!(node_name = %config.node_name, interval_secs = config.interval_secs, "Advertiser configured");

    let health_registry = HealthRegistry::with_failure_threshold(config.failure_threshold);
    health_registry.register(components::STORE).await;
    health_registry.register(components::ADVERTISER).await;

    let metrics = SyncMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(ADVERTISER_VERSION, config.capacity.len());

    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let store = KubeStore::try_default()
        .await?
        .with_field_manager(FIELD_MANAGER);
    let inventory = Inventory {
        capacity: config.capacity.clone(),
        allocatable: config.effective_allocatable().clone(),
    };
    let advertiser = Advertiser::new(&config.node_name, inventory, store, health_registry);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
    };
    advertiser
        .run(Duration::from_secs(config.interval_secs), shutdown)
        .await;

    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    Ok(())
}
