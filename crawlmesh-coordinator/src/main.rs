use anyhow::Context;
use crawlmesh_coordinator::{AppState, config::Config, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crawlmesh_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Crawlmesh Coordinator...");

    let config = Config::from_env()?;
    config.validate().context("Invalid configuration")?;

    tracing::info!("Bundle container: {}", config.container_dir.display());
    tracing::info!(
        "Limits: {} clients, {} pending tasks, {} bundle bytes",
        config.max_clients,
        config.max_pending_tasks,
        config.max_bundle_bytes
    );

    let state = AppState::new(&config).context("Failed to open bundle container")?;

    // Build router with all API endpoints
    let app = create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Received shutdown signal");
}
