//! AWSBuild Controller
//!
//! Watches AWSBuild custom resources and drives live AWS state to match:
//! VPC, subnet, security group, build instance, and the exported machine
//! image. On deletion, tears down everything the system created, in
//! dependency order, and nothing it merely adopted.

mod backoff;
mod controller;
mod credentials;
mod error;
mod reconciler;
mod scope;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::error::ControllerError;
use controller::Controller;
use std::env;
use tracing::info;

/// Worker-slot count when RECONCILE_CONCURRENCY is unset.
const DEFAULT_CONCURRENCY: u16 = 3;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting AWSBuild controller");

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let concurrency = env::var("RECONCILE_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONCURRENCY);

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("default"));
    info!("  Workers: {}", concurrency);

    // Initialize and run controller
    let controller = Controller::new(namespace, concurrency).await?;
    controller.run().await?;

    Ok(())
}
