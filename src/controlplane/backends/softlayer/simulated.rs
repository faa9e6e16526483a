//! In-memory vendor used in standalone mode and tests
//!
//! Mimics the vendor's asynchronous behavior: new volumes are invisible to
//! order-id lookups for a few polls, report active transactions while
//! provisioning, and get a new id once provisioning completes.

use super::api::{
    NetworkStorage, OrderReceipt, OsType, Package, SoftLayerApi, StorageOrder, STORAGE_PACKAGE_TYPE,
};
use crate::domain::ports::OsFormat;
use crate::error::{Error, Result};
use crate::pricing::catalog::{
    CatalogItem, EnduranceTier, ItemPrice, CATEGORY_PERFORMANCE_IOPS, CATEGORY_PERFORMANCE_SPACE,
    CATEGORY_SNAPSHOT_SPACE, CATEGORY_STORAGE_AS_A_SERVICE, CATEGORY_TIER_LEVEL, RESTRICTION_IOPS,
    RESTRICTION_STORAGE_SPACE, RESTRICTION_TIER_LEVEL,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

const PACKAGE_ID: u64 = 759;
const BILLING_ITEM_OFFSET: u64 = 500_000;

pub const STATUS_IN_PROGRESS: &str = "PROVISION_IN_PROGRESS";
pub const STATUS_COMPLETED: &str = "PROVISION_COMPLETED";

#[derive(Debug, Clone)]
struct SimVolume {
    storage: NetworkStorage,
    remaining_polls: u32,
    index_lag: u32,
    billing_item_id: u64,
    reassigned: bool,
}

#[derive(Default)]
struct SimState {
    volumes: BTreeMap<u64, SimVolume>,
    orders: Vec<StorageOrder>,
    transient_failures: u32,
    transaction_queries: u32,
    /// Transaction queries left before the queried volume disappears
    lose_after: Option<u32>,
    withhold_billing_items: bool,
    refuse_cancellation: bool,
}

pub struct SimulatedSoftLayer {
    catalog: Vec<CatalogItem>,
    datacenters: BTreeMap<String, u64>,
    provisioning_polls: u32,
    index_lag_polls: u32,
    duplicate_orders: bool,
    next_id: AtomicU64,
    orders_placed: AtomicU32,
    state: Mutex<SimState>,
}

impl Default for SimulatedSoftLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSoftLayer {
    pub fn new() -> Self {
        let datacenters = [("dal09", 449_494), ("wdc07", 2_017_603), ("lon06", 814_994)]
            .into_iter()
            .map(|(name, id)| (name.to_string(), id))
            .collect();

        Self {
            catalog: default_catalog(),
            datacenters,
            provisioning_polls: 2,
            index_lag_polls: 1,
            duplicate_orders: false,
            next_id: AtomicU64::new(30_000_000),
            orders_placed: AtomicU32::new(0),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_catalog(mut self, catalog: Vec<CatalogItem>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Status polls that report work in progress before completion
    pub fn with_provisioning_polls(mut self, polls: u32) -> Self {
        self.provisioning_polls = polls;
        self
    }

    /// Order-id lookups that miss a new volume
    pub fn with_index_lag(mut self, polls: u32) -> Self {
        self.index_lag_polls = polls;
        self
    }

    /// Every order creates two volumes under the same order id
    pub fn with_duplicate_orders(mut self, duplicate: bool) -> Self {
        self.duplicate_orders = duplicate;
        self
    }

    /// Fail the next `count` transaction queries with a transient error
    pub fn fail_transiently(&self, count: u32) {
        self.state.lock().transient_failures = count;
    }

    /// Remove the queried volume on the `count`th transaction query from now
    pub fn lose_volume_after(&self, count: u32) {
        self.state.lock().lose_after = Some(count.max(1));
    }

    /// Report no billing item for any volume
    pub fn withhold_billing_items(&self, withhold: bool) {
        self.state.lock().withhold_billing_items = withhold;
    }

    /// Answer every cancellation with an unsuccessful result
    pub fn refuse_cancellation(&self, refuse: bool) {
        self.state.lock().refuse_cancellation = refuse;
    }

    pub fn transaction_queries(&self) -> u32 {
        self.state.lock().transaction_queries
    }

    pub fn orders_placed(&self) -> u32 {
        self.orders_placed.load(Ordering::SeqCst)
    }

    pub fn last_order(&self) -> Option<StorageOrder> {
        self.state.lock().orders.last().cloned()
    }

    pub fn volume_count(&self) -> usize {
        self.state.lock().volumes.len()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn not_found(storage_id: u64) -> Error {
        Error::ResourceNotFound {
            kind: "SoftLayer_Network_Storage".into(),
            id: storage_id.to_string(),
        }
    }
}

#[async_trait]
impl SoftLayerApi for SimulatedSoftLayer {
    async fn package_by_type(&self, package_type: &str) -> Result<Package> {
        if package_type != STORAGE_PACKAGE_TYPE {
            return Err(Error::ResourceNotFound {
                kind: "SoftLayer_Product_Package".into(),
                id: package_type.into(),
            });
        }
        Ok(Package {
            id: PACKAGE_ID,
            key_name: STORAGE_PACKAGE_TYPE.into(),
        })
    }

    async fn package_items(&self, package_id: u64) -> Result<Vec<CatalogItem>> {
        if package_id != PACKAGE_ID {
            return Err(Error::ResourceNotFound {
                kind: "SoftLayer_Product_Package".into(),
                id: package_id.to_string(),
            });
        }
        Ok(self.catalog.clone())
    }

    async fn datacenter_id(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.datacenters.get(name).copied())
    }

    async fn os_type(&self, format: OsFormat) -> Result<OsType> {
        let (id, key_name) = match format {
            OsFormat::Linux => (12, "LINUX"),
            OsFormat::HyperV => (22, "HYPER_V"),
            OsFormat::VMware => (6, "VMWARE"),
            OsFormat::Xen => (3, "XEN"),
        };
        Ok(OsType {
            id,
            key_name: key_name.into(),
        })
    }

    async fn place_order(&self, order: &StorageOrder) -> Result<OrderReceipt> {
        self.orders_placed.fetch_add(1, Ordering::SeqCst);

        if order.prices.is_empty() {
            return Err(Error::Backend {
                backend: "softlayer".into(),
                operation: "placeOrder".into(),
                message: "order contains no prices".into(),
            });
        }
        if !self.datacenters.values().any(|id| *id == order.location_id) {
            return Err(Error::Backend {
                backend: "softlayer".into(),
                operation: "placeOrder".into(),
                message: format!("unknown location {}", order.location_id),
            });
        }

        let order_id = self.allocate_id();
        let datacenter = self
            .datacenters
            .iter()
            .find(|(_, id)| **id == order.location_id)
            .map(|(name, _)| name.clone())
            .unwrap_or_default();

        let copies = if self.duplicate_orders { 2 } else { 1 };
        let mut state = self.state.lock();
        for _ in 0..copies {
            let storage_id = self.allocate_id();
            state.volumes.insert(
                storage_id,
                SimVolume {
                    storage: NetworkStorage {
                        id: storage_id,
                        username: format!("SL0{}", storage_id),
                        capacity_gb: order.volume_size,
                        order_id,
                        datacenter: datacenter.clone(),
                    },
                    remaining_polls: self.provisioning_polls,
                    index_lag: self.index_lag_polls,
                    billing_item_id: storage_id + BILLING_ITEM_OFFSET,
                    reassigned: false,
                },
            );
        }
        state.orders.push(order.clone());

        debug!(order_id, "Simulated order placed");
        Ok(OrderReceipt { order_id })
    }

    async fn storage_by_order_id(&self, order_id: u64) -> Result<Vec<NetworkStorage>> {
        let mut state = self.state.lock();
        let mut found = Vec::new();
        for volume in state.volumes.values_mut() {
            if volume.storage.order_id != order_id {
                continue;
            }
            if volume.index_lag > 0 {
                volume.index_lag -= 1;
                continue;
            }
            found.push(volume.storage.clone());
        }
        Ok(found)
    }

    async fn active_transaction_count(&self, storage_id: u64) -> Result<u32> {
        let mut state = self.state.lock();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(Error::BackendUnavailable {
                backend: "softlayer".into(),
                reason: "503 Service Unavailable".into(),
            });
        }
        state.transaction_queries += 1;

        let lose_after = state.lose_after;
        match lose_after {
            Some(left) if left <= 1 => {
                state.lose_after = None;
                state.volumes.remove(&storage_id);
                debug!(storage_id, "Simulated volume removed");
                return Err(Self::not_found(storage_id));
            }
            Some(left) => state.lose_after = Some(left - 1),
            None => {}
        }

        let volume = state
            .volumes
            .get_mut(&storage_id)
            .ok_or_else(|| Self::not_found(storage_id))?;
        if volume.remaining_polls > 0 {
            volume.remaining_polls -= 1;
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn volume_status(&self, storage_id: u64) -> Result<String> {
        let mut state = self.state.lock();
        let volume = state
            .volumes
            .get(&storage_id)
            .cloned()
            .ok_or_else(|| Self::not_found(storage_id))?;

        if volume.remaining_polls > 0 {
            return Ok(STATUS_IN_PROGRESS.into());
        }

        if !volume.reassigned {
            // Completion moves the volume to a new id
            state.volumes.remove(&storage_id);
            let new_id = self.allocate_id();
            let mut moved = volume;
            moved.storage.id = new_id;
            moved.reassigned = true;
            state.volumes.insert(new_id, moved);
            debug!(old_id = storage_id, new_id, "Simulated volume id reassigned");
        }
        Ok(STATUS_COMPLETED.into())
    }

    async fn billing_item_id(&self, storage_id: u64) -> Result<Option<u64>> {
        let state = self.state.lock();
        let volume = state
            .volumes
            .get(&storage_id)
            .ok_or_else(|| Self::not_found(storage_id))?;
        Ok((!state.withhold_billing_items).then_some(volume.billing_item_id))
    }

    async fn cancel_service(&self, billing_item_id: u64) -> Result<bool> {
        let mut state = self.state.lock();
        if state.refuse_cancellation {
            return Ok(false);
        }
        let storage_id = state
            .volumes
            .iter()
            .find(|(_, v)| v.billing_item_id == billing_item_id)
            .map(|(id, _)| *id);
        Ok(match storage_id {
            Some(id) => state.volumes.remove(&id).is_some(),
            None => false,
        })
    }
}

// =============================================================================
// Catalog Fixture
// =============================================================================

/// A catalog shaped like the vendor's storage-as-a-service package
pub fn default_catalog() -> Vec<CatalogItem> {
    let mut items = vec![
        CatalogItem::new(9_571, "STORAGE_AS_A_SERVICE")
            .with_category(CATEGORY_STORAGE_AS_A_SERVICE)
            .with_price(ItemPrice::new(189_433, CATEGORY_STORAGE_AS_A_SERVICE)),
        CatalogItem::new(9_572, "BLOCK_STORAGE_2")
            .with_category("storage_block")
            .with_price(ItemPrice::new(189_443, "storage_block")),
        CatalogItem::new(9_573, "FILE_STORAGE_2")
            .with_category("storage_file")
            .with_price(ItemPrice::new(189_453, "storage_file")),
    ];

    let space_ranges = [
        (20, 39),
        (40, 79),
        (80, 99),
        (100, 499),
        (500, 999),
        (1_000, 1_999),
        (2_000, 12_000),
    ];
    for (i, (min, max)) in space_ranges.into_iter().enumerate() {
        let i = i as u64;
        items.push(
            CatalogItem::new(10_000 + i, format!("{}_{}_GBS", min, max))
                .with_category(CATEGORY_PERFORMANCE_SPACE)
                .with_range(min, max)
                .with_price(ItemPrice::new(190_000 + i, CATEGORY_PERFORMANCE_SPACE)),
        );
    }

    let iops_ranges = [(100, 1_000), (1_001, 6_000), (6_001, 48_000)];
    for (i, (min, max)) in iops_ranges.into_iter().enumerate() {
        let i = i as u64;
        items.push(
            CatalogItem::new(11_000 + i, format!("{}_{}_IOPS", min, max))
                .with_category(CATEGORY_PERFORMANCE_IOPS)
                .with_range(min, max)
                .with_price(
                    ItemPrice::new(191_000 + i * 10, CATEGORY_PERFORMANCE_IOPS)
                        .restricted(RESTRICTION_STORAGE_SPACE, 20, 499),
                )
                .with_price(
                    ItemPrice::new(191_001 + i * 10, CATEGORY_PERFORMANCE_IOPS)
                        .restricted(RESTRICTION_STORAGE_SPACE, 500, 12_000),
                ),
        );
    }

    for (i, tier) in EnduranceTier::ALL.into_iter().enumerate() {
        let i = i as u64;
        items.push(
            CatalogItem::new(12_000 + i, tier.space_key_name())
                .with_category(CATEGORY_PERFORMANCE_SPACE)
                .with_range(20, 12_000)
                .with_price(
                    ItemPrice::new(192_100 + i, CATEGORY_PERFORMANCE_SPACE).in_location_group(503),
                )
                .with_price(ItemPrice::new(192_000 + i, CATEGORY_PERFORMANCE_SPACE)),
        );
        items.push(
            CatalogItem::new(13_000 + i, tier.key_name())
                .with_category(CATEGORY_TIER_LEVEL)
                .with_capacity(tier.capacity_restriction() as f64)
                .with_price(ItemPrice::new(193_000 + i, CATEGORY_TIER_LEVEL)),
        );
    }

    let snapshot_sizes = [5, 10, 20, 40, 80, 100, 250, 500, 1_000, 2_000, 4_000];
    for (i, size) in snapshot_sizes.into_iter().enumerate() {
        let i = i as u64;
        let mut item = CatalogItem::new(14_000 + i, format!("{}_GB_STORAGE_SPACE", size))
            .with_category(CATEGORY_SNAPSHOT_SPACE)
            .with_capacity(size as f64)
            .with_price(
                ItemPrice::new(194_000 + i * 10, CATEGORY_SNAPSHOT_SPACE)
                    .restricted(RESTRICTION_IOPS, 100, 48_000),
            );
        for (j, tier) in EnduranceTier::ALL.into_iter().enumerate() {
            let restriction = tier.capacity_restriction();
            item = item.with_price(
                ItemPrice::new(194_001 + i * 10 + j as u64, CATEGORY_SNAPSHOT_SPACE)
                    .restricted(RESTRICTION_TIER_LEVEL, restriction, restriction),
            );
        }
        items.push(item);
    }

    items
}
