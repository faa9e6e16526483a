//! SoftLayer Block Storage Driver
//!
//! Orders storage-as-a-service volumes through the vendor catalog. Ordering
//! is asynchronous on the vendor side, so `create` drives two waits:
//!
//! ```text
//! price selection ─► place order ─► lookup by order id ─► wait available ─► lookup by order id
//!   (fail fast)                       (not-found grace)     (transactions,      (id is reassigned
//!                                                            volume status)      on completion)
//! ```
//!
//! Only create, delete and device-id extraction are implemented; everything
//! else reports `NotSupported`.

pub mod api;
pub mod simulated;

pub use api::*;
pub use simulated::SimulatedSoftLayer;

use crate::config::{PollConfig, SoftLayerDriverConfig};
use crate::domain::ports::{Disk, DiskSpec, Labels, ResourceHandle, StorageOps, StorageTier};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::pricing::selector::performance_iops;
use crate::pricing::{select_prices, StorageProtocol};
use crate::provisioning::state_machine::RETRY_STATE;
use crate::provisioning::{Clock, Observation, TokioClock};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

const BACKEND: &str = "softlayer";

const LOOKUP_ACTION: &str = "storage lookup by order id";
const AVAILABILITY_ACTION: &str = "storage availability";

const STATE_PENDING: &str = "pending";
const STATE_COMPLETE: &str = "complete";
const STATE_PROVISIONING: &str = "provisioning";
const STATE_AVAILABLE: &str = "available";

/// Volume status fragments that mean provisioning finished
const PROVISION_COMPLETE_MARKERS: [&str; 2] =
    ["PROVISION_COMPLETED", "Volume Provisioning has completed"];

/// A volume produced by [`SoftLayerOps::create`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftLayerVolume {
    pub id: u64,
    pub order_id: u64,
    pub username: String,
    pub capacity_gb: u64,
    pub datacenter: String,
    pub spec: DiskSpec,
    pub labels: Labels,
}

pub struct SoftLayerOps<A> {
    name: String,
    datacenter: String,
    protocol: StorageProtocol,
    poll: PollConfig,
    api: Arc<A>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<Metrics>>,
}

impl<A: SoftLayerApi> SoftLayerOps<A> {
    pub fn new(config: &SoftLayerDriverConfig, poll: PollConfig, api: Arc<A>) -> Self {
        Self {
            name: config.name.clone(),
            datacenter: config.datacenter.clone(),
            protocol: config.protocol,
            poll,
            api,
            clock: Arc::new(TokioClock),
            metrics: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    fn record_probe(&self, action: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_probe(action);
        }
    }

    /// Wait until exactly one volume is indexed under `order_id`
    async fn find_storage_by_order_id(&self, order_id: u64) -> Result<NetworkStorage> {
        let conf = self
            .poll
            .state_change(LOOKUP_ACTION)
            .pending([STATE_PENDING])
            .target(STATE_COMPLETE)
            .not_found_checks(self.poll.not_found_checks);

        conf.wait_for_state(self.clock.as_ref(), || async move {
            self.record_probe(LOOKUP_ACTION);
            let found = self.api.storage_by_order_id(order_id).await?;
            Observation::from_matches(order_id, found, STATE_COMPLETE)
        })
        .await
    }

    /// Wait until the volume has no active transactions and reports a
    /// completed provisioning status
    async fn wait_for_storage_available(&self, storage_id: u64) -> Result<()> {
        debug!(storage_id, "Waiting for storage to become available");
        let conf = self
            .poll
            .state_change(AVAILABILITY_ACTION)
            .pending([RETRY_STATE, STATE_PROVISIONING])
            .target(STATE_AVAILABLE);

        conf.wait_for_state(self.clock.as_ref(), || async move {
            self.record_probe(AVAILABILITY_ACTION);

            let transactions = match self.api.active_transaction_count(storage_id).await {
                Ok(count) => count,
                Err(e @ Error::ResourceNotFound { .. }) => return Err(e),
                Err(e) => {
                    debug!(storage_id, error = %e, "Transaction query failed, retrying");
                    return Ok(Observation::state(RETRY_STATE, ()));
                }
            };
            if transactions > 0 {
                return Ok(Observation::state(STATE_PROVISIONING, ()));
            }

            let status = match self.api.volume_status(storage_id).await {
                Ok(status) => status,
                Err(e) => {
                    debug!(storage_id, error = %e, "Volume status query failed, retrying");
                    return Ok(Observation::state(RETRY_STATE, ()));
                }
            };
            if PROVISION_COMPLETE_MARKERS.iter().any(|m| status.contains(m)) {
                Ok(Observation::state(STATE_AVAILABLE, ()))
            } else {
                Ok(Observation::state(STATE_PROVISIONING, ()))
            }
        })
        .await
    }
}

#[async_trait]
impl<A: SoftLayerApi + 'static> StorageOps for SoftLayerOps<A> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self, spec: &DiskSpec, labels: &Labels) -> Result<Disk> {
        spec.validate()?;

        let os_type = self.api.os_type(spec.os_format).await?;
        let package = self.api.package_by_type(STORAGE_PACKAGE_TYPE).await?;
        let items = self.api.package_items(package.id).await?;
        let selection = select_prices(&items, spec, self.protocol)?;

        let location_id = self
            .api
            .datacenter_id(&self.datacenter)
            .await?
            .ok_or_else(|| {
                Error::InvalidArgument(format!("unknown datacenter {}", self.datacenter))
            })?;

        let iops = match spec.storage_tier {
            StorageTier::Performance => Some(performance_iops(spec)?),
            StorageTier::Endurance => None,
        };

        let order = StorageOrder {
            package_id: package.id,
            location_id,
            quantity: 1,
            prices: selection.price_ids(),
            use_hourly_pricing: spec.hourly_billing,
            os_format_type: os_type,
            volume_size: spec.capacity_gb,
            iops,
            protocol: self.protocol,
        };

        info!(
            driver = %self.name,
            tier = %spec.storage_tier,
            capacity_gb = spec.capacity_gb,
            datacenter = %self.datacenter,
            prices = ?order.prices,
            "Placing storage order"
        );
        let receipt = self.api.place_order(&order).await?;

        let storage = self.find_storage_by_order_id(receipt.order_id).await?;
        self.wait_for_storage_available(storage.id).await?;

        // The vendor assigns a new id once provisioning completes
        let storage = self.find_storage_by_order_id(receipt.order_id).await?;
        info!(
            driver = %self.name,
            storage_id = storage.id,
            order_id = receipt.order_id,
            "Storage provisioned"
        );

        let volume = SoftLayerVolume {
            id: storage.id,
            order_id: receipt.order_id,
            username: storage.username,
            capacity_gb: storage.capacity_gb,
            datacenter: storage.datacenter,
            spec: spec.clone(),
            labels: labels.clone(),
        };
        Ok(Disk::new(self.name.clone(), ResourceHandle::from(volume.id), volume.clone())
            .with_attribute("order_id", volume.order_id.to_string())
            .with_attribute("username", volume.username)
            .with_attribute("capacity_gb", volume.capacity_gb.to_string())
            .with_attribute("datacenter", volume.datacenter)
            .with_attribute("storage_tier", spec.storage_tier.to_string()))
    }

    fn get_device_id(&self, disk: &Disk) -> Result<String> {
        disk.downcast_ref::<SoftLayerVolume>()
            .map(|v| v.id.to_string())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "resource {} is not a {} volume",
                    disk.handle(),
                    BACKEND
                ))
            })
    }

    async fn delete(&self, volume_id: &str) -> Result<()> {
        let storage_id: u64 = volume_id.parse().map_err(|_| {
            Error::InvalidArgument(format!("{} is not a numeric storage id", volume_id))
        })?;

        let billing_item_id = self
            .api
            .billing_item_id(storage_id)
            .await?
            .ok_or_else(|| Error::Backend {
                backend: BACKEND.into(),
                operation: "getBillingItem".into(),
                message: format!("no billing item for id {}", storage_id),
            })?;

        if !self.api.cancel_service(billing_item_id).await? {
            return Err(Error::Backend {
                backend: BACKEND.into(),
                operation: "cancelService".into(),
                message: "vendor reported an unsuccessful cancellation".into(),
            });
        }

        info!(driver = %self.name, storage_id, billing_item_id, "Storage cancelled");
        Ok(())
    }
}
