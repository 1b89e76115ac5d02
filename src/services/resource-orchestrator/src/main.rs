//! Resource Orchestrator
//!
//! Main entry point for the AI-CORE multi-provider resource orchestrator. Runs the
//! autoscaling loop and monitoring tasks with logging-only provider and notification
//! backends until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use resource_orchestrator::{
    config::{Args, OrchestratorConfig},
    dry_run::{LoggingNotifier, LoggingProviderOps},
    orchestrator::Orchestrator,
    telemetry,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let config = OrchestratorConfig::load(&args)?;

    // Initialize telemetry
    telemetry::init_tracing(&config.logging)?;

    info!(
        "Starting AI-CORE Resource Orchestrator v{}",
        resource_orchestrator::VERSION
    );
    info!("Configuration loaded from: {:?}", args.config);
    info!(
        providers = ?config.providers.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
        strategy = %config.load_balancer.default_strategy,
        auto_scaling = config.autoscaling.auto_scaling,
        "Dry-run mode: scaling and notifications are logged only"
    );

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(LoggingProviderOps),
        Arc::new(LoggingNotifier),
    )
    .context("Failed to initialize resource orchestrator")?;

    orchestrator.start();

    let health = orchestrator.system_health();
    info!(
        status = ?health.status,
        providers = health.providers.len(),
        "Resource orchestrator running"
    );

    shutdown_signal().await;

    orchestrator.shutdown().await;
    info!("Resource orchestrator stopped");

    Ok(())
}
