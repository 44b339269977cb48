use anyhow::Result;
use crawlmesh_worker::Worker;
use crawlmesh_worker::config::Config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crawlmesh_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Crawlmesh Worker");

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;
    info!(
        "Loaded configuration: worker_id={}, coordinator_url={}",
        config.worker_id, config.coordinator_url
    );
    info!("Worker directory: {}", config.worker_dir.display());

    let worker = Worker::new(config)?;
    info!("Worker initialized successfully");

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = &result {
                error!("Poller error: {:#}", e);
            }
            worker.shutdown().await;
            result
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal, stopping tasks");
            worker.shutdown().await;
            Ok(())
        }
    }
}
