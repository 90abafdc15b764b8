use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod engine;
mod error;
mod features;
mod jobs;
mod network;
mod normalization;
mod predictor;
mod routes;
mod rows;
mod store;
mod trainer;
mod types;

use config::Config;
use engine::DemandEngine;
use jobs::JobRegistry;
use routes::AppState;
use store::ModelStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "demand_engine=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    info!("Loaded configuration: {:?}", config);

    // Initialize metrics recorder, rendered by GET /metrics
    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let store = ModelStore::new(&config.model_dir);
    match store.current_generation() {
        Ok(generation) => info!("Serving demand model {} from {}", generation, store.dir().display()),
        Err(e) => warn!("No usable model in {}: {}", store.dir().display(), e),
    }

    let engine = DemandEngine::new(store, config.training());
    let jobs = JobRegistry::with_retention(config.job_retention);
    let app = routes::router(AppState::new(engine, jobs, Some(metrics)));

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    info!("Starting demand engine on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, starting graceful shutdown");
}
