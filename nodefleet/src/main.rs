mod simulated;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use nodefleet_cluster::{BroadcastPublisher, ClusterEvent, ClusterManager, CompositeDiscovery};
use nodefleet_core::{logging, Config};

use simulated::SimulatedTelemetry;

#[derive(Parser, Debug)]
#[command(name = "nodefleet")]
#[command(about = "Node fleet control plane", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(long, short, env = "NODEFLEET_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())?;

    // 2. Validate (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    info!(host = %host, "NodeFleet control plane starting...");

    // 4. Wire the control plane
    let publisher = Arc::new(BroadcastPublisher::default());
    let event_log = tokio::spawn(log_events(publisher.subscribe()));

    let manager = Arc::new(ClusterManager::new(
        config.cluster.clone(),
        Arc::new(SimulatedTelemetry::new()),
        Arc::new(CompositeDiscovery::from_config(&config.discovery)),
        publisher,
    )?);

    // 5. Run until signalled
    manager.start().await;
    info!(nodes = manager.list_nodes(None).len(), "Control plane running");

    shutdown_signal().await;

    manager.shutdown().await;
    event_log.abort();

    let status = manager.get_cluster_status();
    info!(status = %serde_json::to_string(&status)?, "Final cluster status");
    Ok(())
}

/// Log every control-plane event as JSON
async fn log_events(mut events: broadcast::Receiver<ClusterEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match event.to_json() {
                Ok(payload) => info!(event_type = event.event_type(), payload = %payload, "Cluster event"),
                Err(e) => warn!(event_type = event.event_type(), error = %e, "Failed to serialize event"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
