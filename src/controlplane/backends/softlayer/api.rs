//! Vendor catalog and ordering API consumed by [`SoftLayerOps`](super::SoftLayerOps)
//!
//! Error convention for implementations: a missing object is
//! [`Error::ResourceNotFound`], a throttled or unreachable endpoint is
//! [`Error::BackendUnavailable`], anything else is [`Error::Backend`].

use crate::domain::ports::OsFormat;
use crate::error::Result;
use crate::pricing::catalog::{CatalogItem, StorageProtocol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Package type every storage order is placed against
pub const STORAGE_PACKAGE_TYPE: &str = "STORAGE_AS_A_SERVICE";

/// A product package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: u64,
    pub key_name: String,
}

/// iSCSI OS type as the vendor names it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsType {
    pub id: u64,
    pub key_name: String,
}

/// Storage-as-a-service order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageOrder {
    pub package_id: u64,
    pub location_id: u64,
    pub quantity: u32,
    pub prices: Vec<u64>,
    pub use_hourly_pricing: bool,
    pub os_format_type: OsType,
    pub volume_size: u64,
    /// Provisioned IOPS, performance orders only
    pub iops: Option<u64>,
    pub protocol: StorageProtocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: u64,
}

/// A network storage volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStorage {
    pub id: u64,
    pub username: String,
    pub capacity_gb: u64,
    pub order_id: u64,
    pub datacenter: String,
}

#[async_trait]
pub trait SoftLayerApi: Send + Sync {
    async fn package_by_type(&self, package_type: &str) -> Result<Package>;

    async fn package_items(&self, package_id: u64) -> Result<Vec<CatalogItem>>;

    /// Location id of a datacenter short name, `None` if unknown
    async fn datacenter_id(&self, name: &str) -> Result<Option<u64>>;

    async fn os_type(&self, format: OsFormat) -> Result<OsType>;

    async fn place_order(&self, order: &StorageOrder) -> Result<OrderReceipt>;

    /// Storage volumes whose billing item belongs to `order_id`
    async fn storage_by_order_id(&self, order_id: u64) -> Result<Vec<NetworkStorage>>;

    async fn active_transaction_count(&self, storage_id: u64) -> Result<u32>;

    async fn volume_status(&self, storage_id: u64) -> Result<String>;

    async fn billing_item_id(&self, storage_id: u64) -> Result<Option<u64>>;

    /// Cancel a billing item; `false` when the vendor refuses
    async fn cancel_service(&self, billing_item_id: u64) -> Result<bool>;
}
