//! Subnet Allocator Controller
//!
//! Assigns non-overlapping IPv4 CIDR blocks to `TenantCluster` and `NodePool`
//! resources. Allocations are carved from the installation default network or
//! from a referenced `NetworkPool`, avoiding every subnet already held by
//! another object or present in the cloud account.

mod backoff;
mod config;
mod controller;
mod error;
mod probes;
mod reconciler;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use crate::probes::Metrics;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // kube and reqwest both use rustls; pin the provider before any client exists
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Subnet Allocator Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Default network: {}", config.default_network);
    info!(
        "  Mask bits: cluster /{}, node pool /{}",
        config.cluster_mask_bits, config.node_pool_mask_bits
    );
    info!("  Inventory URL: {}", config.inventory_url);
    info!(
        "  Inventory account: {} ({})",
        config.inventory_account, config.inventory_region
    );
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!(
        "  Lock: {}/{} (ttl {:?}) as {}",
        config.lock_namespace,
        config.lock_name,
        config.lock_ttl,
        config.lock_identity()
    );
    info!("  Probes: {}", config.probe_addr);

    let metrics = Metrics::new()?;

    let controller = Controller::new(config, metrics).await?;
    controller.run().await?;

    Ok(())
}
