use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use argus::config::{self, Config};
use argus::metrics;
use argus::monitor::registry::ServerOwnership;
use argus::monitor::Monitor;
use argus::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config();

    // Build the shared server descriptors.
    let servers: Vec<Arc<Server>> = config.servers.iter().map(Server::from_config).collect();
    info!(servers = servers.len(), "Servers configured");

    // Start metrics server in background
    if config.metrics.enabled {
        let metrics_addr = config.metrics.listen_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(&metrics_addr).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    // One monitor per configured block, all sharing the ownership registry.
    let ownership = Arc::new(ServerOwnership::new());
    let mut monitors = Vec::new();
    for monitor_config in &config.monitors {
        let mut monitor = Monitor::new(
            monitor_config.name.as_str(),
            monitor_config.module.as_str(),
            &config.data_dir,
            ownership.clone(),
        );
        if let Err(e) = monitor.configure(monitor_config, &servers) {
            error!(monitor = %monitor_config.name, error = %e, "Failed to configure monitor");
            continue;
        }
        match monitor.start().await {
            Ok(()) => monitors.push(monitor),
            Err(e) => {
                error!(monitor = %monitor_config.name, error = %e, "Failed to start monitor")
            }
        }
    }

    if monitors.is_empty() {
        warn!("No monitors running");
    } else {
        info!(monitors = monitors.len(), "Argus monitoring started");
    }

    shutdown_signal().await;
    info!("Shutdown signal received");

    for monitor in &mut monitors {
        monitor.stop().await;
    }

    info!("Argus shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn load_or_default_config() -> Config {
    let config_paths = ["config/argus.toml", "argus.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
