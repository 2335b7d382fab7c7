//! FleetCap Controller
//!
//! Reconciles four intent kinds:
//! - AdHocCommand / ScheduledCommand: run the tracing agent next to every pod
//!   a label selector matches, once or on a schedule
//! - PacketCapture: capture traffic inside one pod's network namespace
//! - DataEndpoint: deploy the relay sink captured data is streamed to

mod backoff;
mod config;
mod controller;
mod error;
mod health;
mod metrics;
mod reconciler;
mod relay;
mod runtime;
mod watcher;

#[cfg(test)]
mod test_utils;

use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ControllerConfig;
use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls transport needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting FleetCap Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Agent image: {}", config.agent_image);
    info!("  Runtime socket: {}", config.runtime_socket);
    info!("  CronJob concurrency policy: {}", config.cron_concurrency_policy.as_str());
    info!("  Capture output dir: {}", config.capture_output_dir);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
