//! Storage Backend Drivers
//!
//! Provides the drivers the registry can be populated with:
//! - Local: in-process block volumes with host device paths
//! - SoftLayer: vendor-ordered storage-as-a-service volumes
//! - Unsupported: named stubs for providers without an implementation

pub mod local;
pub mod softlayer;
pub mod unsupported;

pub use local::*;
pub use softlayer::{SimulatedSoftLayer, SoftLayerApi, SoftLayerOps, SoftLayerVolume};
pub use unsupported::*;

use crate::config::{ControlPlaneConfig, DriverConfig, PollConfig};
use crate::controlplane::registry::DriverRegistry;
use crate::domain::ports::StorageOpsRef;
use crate::error::Result;
use crate::metrics::Metrics;
use std::sync::Arc;
use tracing::info;

/// Factory for creating storage drivers from configuration
pub struct BackendFactory;

impl BackendFactory {
    /// Create the driver described by `config`
    pub fn create(
        config: &DriverConfig,
        poll: &PollConfig,
        metrics: &Arc<Metrics>,
    ) -> StorageOpsRef {
        match config {
            DriverConfig::Local(local) => Arc::new(LocalOps::new(local.clone())),
            DriverConfig::Softlayer(softlayer) => {
                let api = SimulatedSoftLayer::new()
                    .with_provisioning_polls(softlayer.provisioning_polls)
                    .with_index_lag(softlayer.index_lag_polls);
                Arc::new(
                    SoftLayerOps::new(softlayer, poll.clone(), Arc::new(api))
                        .with_metrics(metrics.clone()),
                )
            }
            DriverConfig::Unsupported { name } => Arc::new(UnsupportedOps::new(name.clone())),
        }
    }

    /// Build a registry holding every configured driver
    pub fn build_registry(
        config: &ControlPlaneConfig,
        metrics: &Arc<Metrics>,
    ) -> Result<DriverRegistry> {
        let registry = DriverRegistry::new();
        for driver in config.effective_drivers() {
            let ops = Self::create(&driver, &config.poll, metrics);
            registry.register(driver.name(), ops)?;
        }
        info!(drivers = ?registry.names(), "Driver registry populated");
        Ok(registry)
    }
}
