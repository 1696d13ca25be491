// src/main.rs

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gridpulse::{
    router, AppConfig, AppState, InfluxStore, SampleStore, Supervisor, SupervisorConfig,
    WsFeedConnector,
};

#[derive(Parser, Debug)]
#[command(
    name = "gridpulse",
    version,
    about = "Supervised power-feed ingestion with a time-series query API"
)]
struct Cli {
    /// Configuration file (TOML, extension optional); environment variables
    /// with the GRIDPULSE_ prefix override it
    #[arg(short, long, default_value = "gridpulse")]
    config: String,

    /// Override the HTTP listen port from the configuration
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gridpulse=info,tower_http=warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = AppConfig::load(&cli.config).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.http.port = port;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gridpulse");

    let store = Arc::new(InfluxStore::new(&config.influx).context("failed to build store client")?);
    let connector = Arc::new(WsFeedConnector::new(config.feed.clone()));

    let supervisor = Supervisor::new(
        SupervisorConfig::default(),
        connector,
        Arc::clone(&store) as Arc<dyn SampleStore>,
    );
    let handle = supervisor.handle();
    let supervisor_task = tokio::spawn(supervisor.start());

    let app = router(AppState {
        store: store as Arc<dyn SampleStore>,
        supervisor: handle.clone(),
    });

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // The server has drained; stop the ingestion side and wait for its
    // terminal teardown to run.
    if let Err(e) = handle.shutdown().await {
        warn!("Supervisor already stopped: {}", e);
    }
    match supervisor_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Supervisor exited with error: {}", e),
        Err(e) => warn!("Supervisor task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
