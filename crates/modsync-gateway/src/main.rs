//! modsync gateway - HTTP API for module reconciliation
//!
//! This is the main entry point for the gateway service. It wires the RocksDB
//! module store, the Kubernetes cluster client and the HTTP template store
//! into a module service and serves it.
//!
//! On Ctrl-C the server stops accepting requests and in-flight reconciles
//! are cancelled; their progress is recorded in the module status.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modsync_cluster::{ClusterConfig, K8sClusterStore};
use modsync_control::{
    CancelSignal, ControlConfig, HttpTemplateStore, ModuleService, TemplateConfig,
};
use modsync_gateway::{create_router, GatewayConfig, GatewayState};
use modsync_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,modsync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting modsync gateway");

    // Load configuration from environment
    let gateway_config = GatewayConfig::from_env();
    let cluster_config = ClusterConfig::from_env();
    let template_config = TemplateConfig::from_env();
    let control_config = ControlConfig::from_env();
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/modsync".into());

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %data_dir,
        field_manager = %cluster_config.field_manager,
        template_default_version = %template_config.default_version,
        "Gateway configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&data_dir)?);

    // Connect to the cluster and warm the kind cache
    let cluster = K8sClusterStore::new(cluster_config).await?;
    cluster.refresh_kinds().await?;
    tracing::info!("Cluster client initialized");

    let templates = HttpTemplateStore::new(template_config)?;

    let control = Arc::new(ModuleService::new(
        store,
        Arc::new(cluster),
        Arc::new(templates),
        control_config,
    ));

    // Reconciles observe this signal; it fires on shutdown
    let (shutdown_handle, shutdown) = CancelSignal::new();

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(control, gateway_config).with_shutdown(shutdown);
    let app = create_router(state);

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested, cancelling in-flight reconciles");
            shutdown_handle.cancel();
        })
        .await?;

    Ok(())
}
