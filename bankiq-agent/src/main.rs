//! bankiq-agent - BankIQ Agent Gateway
//!
//! Sits between synchronous HTTP clients and the hosted conversational AI
//! backend: accepts requests as asynchronous jobs, relays streamed output,
//! serves polling clients from the same execution, and shields upstream data
//! sources behind a category-aware cache with deterministic fallback.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bankiq_agent::config::{AgentConfig, Cli};
use bankiq_agent::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting bankiq-agent (BankIQ Agent Gateway)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve configuration: CLI -> env -> TOML -> defaults
    let cli = Cli::parse();
    let config = AgentConfig::resolve(&cli)?;
    info!(
        port = config.port,
        backend = %config.backend_url,
        job_timeout_secs = config.job_timeout.as_secs(),
        source_timeout_secs = config.source_timeout.as_secs(),
        "Configuration resolved"
    );

    // Construct services explicitly and start background work
    let state = AppState::from_config(&config)?;
    state.start();
    info!("Job manager and retention sweeper started");

    // Build router
    let app = build_router(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await?;
    info!("Listening on http://127.0.0.1:{}", config.port);
    info!("Health check: http://127.0.0.1:{}/health", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: stop the sweeper and signal in-flight jobs
    state.shutdown().await;
    info!("bankiq-agent stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
