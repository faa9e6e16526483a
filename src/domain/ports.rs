//! Domain Ports - The storage-ops lifecycle contract
//!
//! Every backend (local or cloud) implements [`StorageOps`]. Capabilities a
//! backend does not provide fall through to the default methods, which
//! return [`Error::NotSupported`]; that is an expected outcome, not a
//! failure.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key/value labels attached to volumes
pub type Labels = BTreeMap<String, String>;

// =============================================================================
// Disk Specification
// =============================================================================

/// Storage class requested for a new disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Provisioned-IOPS storage; `iops_per_gb` carries the absolute IOPS figure
    Performance,
    /// Tiered storage; `iops_per_gb` selects one of the fixed endurance tiers
    Endurance,
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageTier::Performance => write!(f, "performance"),
            StorageTier::Endurance => write!(f, "endurance"),
        }
    }
}

/// OS format the volume is prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OsFormat {
    #[default]
    Linux,
    #[serde(rename = "Hyper-V")]
    HyperV,
    #[serde(rename = "VMWare")]
    VMware,
    Xen,
}

impl OsFormat {
    /// Name as understood by vendor OS-type lookups
    pub fn vendor_name(&self) -> &'static str {
        match self {
            OsFormat::Linux => "Linux",
            OsFormat::HyperV => "Hyper-V",
            OsFormat::VMware => "VMWare",
            OsFormat::Xen => "Xen",
        }
    }
}

impl std::fmt::Display for OsFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.vendor_name())
    }
}

/// Abstract creation request.
///
/// Immutable once handed to a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpec {
    pub storage_tier: StorageTier,
    /// IOPS per GB for endurance disks, provisioned IOPS for performance disks
    pub iops_per_gb: f64,
    pub capacity_gb: u64,
    /// Snapshot reservation in GB, 0 for none
    #[serde(default)]
    pub snapshot_reserve_gb: u64,
    #[serde(default)]
    pub os_format: OsFormat,
    #[serde(default)]
    pub hourly_billing: bool,
}

impl DiskSpec {
    pub fn new(storage_tier: StorageTier, iops_per_gb: f64, capacity_gb: u64) -> Self {
        Self {
            storage_tier,
            iops_per_gb,
            capacity_gb,
            snapshot_reserve_gb: 0,
            os_format: OsFormat::default(),
            hourly_billing: false,
        }
    }

    pub fn with_snapshot_reserve(mut self, snapshot_reserve_gb: u64) -> Self {
        self.snapshot_reserve_gb = snapshot_reserve_gb;
        self
    }

    pub fn with_hourly_billing(mut self, hourly_billing: bool) -> Self {
        self.hourly_billing = hourly_billing;
        self
    }

    pub fn with_os_format(mut self, os_format: OsFormat) -> Self {
        self.os_format = os_format;
        self
    }

    /// Reject specs that cannot describe any disk
    pub fn validate(&self) -> Result<()> {
        if self.capacity_gb == 0 {
            return Err(Error::InvalidArgument("capacityGb must be greater than 0".into()));
        }
        if !self.iops_per_gb.is_finite() || self.iops_per_gb < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "iopsPerGb must be a non-negative number, got {}",
                self.iops_per_gb
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Provisioned Resources
// =============================================================================

/// Backend-assigned identity of a provisioned volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ResourceHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ResourceHandle {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A backend-specific resource value (volume or snapshot).
///
/// The payload is opaque to everything except the backend that produced it;
/// [`StorageOps::get_device_id`] downcasts it back.
#[derive(Clone)]
pub struct Disk {
    handle: ResourceHandle,
    driver: String,
    attributes: BTreeMap<String, String>,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Disk {
    pub fn new<T>(driver: impl Into<String>, handle: ResourceHandle, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            handle,
            driver: driver.into(),
            attributes: BTreeMap::new(),
            inner: Arc::new(value),
        }
    }

    /// Attach a descriptive attribute surfaced to API callers
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("handle", &self.handle)
            .field("driver", &self.driver)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// I/O counters reported by drivers that track them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    pub reads: u64,
    pub writes: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub used_bytes: u64,
}

// =============================================================================
// Storage-Ops Lifecycle Contract
// =============================================================================

/// Capability set implemented by every storage backend.
///
/// Only `name` is required. Backends that provision asynchronously must not
/// return from `create` before the volume is available or has failed.
#[async_trait]
pub trait StorageOps: Send + Sync {
    /// Registered driver name
    fn name(&self) -> &str;

    /// Provision a volume and apply the given labels
    async fn create(&self, spec: &DiskSpec, labels: &Labels) -> Result<Disk> {
        let _ = (spec, labels);
        Err(Error::not_supported(self.name(), "create"))
    }

    /// Extract the stable identifier from a resource this backend produced
    fn get_device_id(&self, disk: &Disk) -> Result<String> {
        let _ = disk;
        Err(Error::not_supported(self.name(), "get_device_id"))
    }

    /// Attach a volume to the calling host, returning the device path
    async fn attach(&self, volume_id: &str) -> Result<String> {
        let _ = volume_id;
        Err(Error::not_supported(self.name(), "attach"))
    }

    /// Detach a volume from the calling host
    async fn detach(&self, volume_id: &str) -> Result<()> {
        let _ = volume_id;
        Err(Error::not_supported(self.name(), "detach"))
    }

    /// Detach a volume from a named instance
    async fn detach_from(&self, volume_id: &str, instance: &str) -> Result<()> {
        let _ = (volume_id, instance);
        Err(Error::not_supported(self.name(), "detach_from"))
    }

    /// Delete a volume and release its backing resource
    async fn delete(&self, volume_id: &str) -> Result<()> {
        let _ = volume_id;
        Err(Error::not_supported(self.name(), "delete"))
    }

    /// Snapshot a volume
    async fn snapshot(&self, volume_id: &str, readonly: bool) -> Result<Disk> {
        let _ = (volume_id, readonly);
        Err(Error::not_supported(self.name(), "snapshot"))
    }

    /// Delete a snapshot
    async fn snapshot_delete(&self, snapshot_id: &str) -> Result<()> {
        let _ = snapshot_id;
        Err(Error::not_supported(self.name(), "snapshot_delete"))
    }

    /// Restore a volume from one of its snapshots
    async fn restore(&self, volume_id: &str, snapshot_id: &str) -> Result<()> {
        let _ = (volume_id, snapshot_id);
        Err(Error::not_supported(self.name(), "restore"))
    }

    /// Inspect the given volumes
    async fn inspect(&self, volume_ids: &[String]) -> Result<Vec<Disk>> {
        let _ = volume_ids;
        Err(Error::not_supported(self.name(), "inspect"))
    }

    /// Enumerate volumes matching the filters, grouped by the value of the
    /// `set_identifier` label
    async fn enumerate(
        &self,
        volume_ids: &[String],
        labels: &Labels,
        set_identifier: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<Disk>>> {
        let _ = (volume_ids, labels, set_identifier);
        Err(Error::not_supported(self.name(), "enumerate"))
    }

    /// I/O statistics for a volume
    async fn stats(&self, volume_id: &str) -> Result<VolumeStats> {
        let _ = volume_id;
        Err(Error::not_supported(self.name(), "stats"))
    }

    /// Labels currently applied to a volume
    async fn tags(&self, volume_id: &str) -> Result<Labels> {
        let _ = volume_id;
        Err(Error::not_supported(self.name(), "tags"))
    }

    async fn apply_tags(&self, volume_id: &str, labels: &Labels) -> Result<()> {
        let _ = (volume_id, labels);
        Err(Error::not_supported(self.name(), "apply_tags"))
    }

    async fn remove_tags(&self, volume_id: &str, labels: &Labels) -> Result<()> {
        let _ = (volume_id, labels);
        Err(Error::not_supported(self.name(), "remove_tags"))
    }

    /// Map of local device path to volume id
    async fn device_mappings(&self) -> Result<BTreeMap<String, String>> {
        Err(Error::not_supported(self.name(), "device_mappings"))
    }

    /// Local device path of an attached volume
    async fn device_path(&self, volume_id: &str) -> Result<String> {
        let _ = volume_id;
        Err(Error::not_supported(self.name(), "device_path"))
    }

    /// Device paths not covered by `block_device_mappings` or the root device
    async fn free_devices(
        &self,
        block_device_mappings: &[String],
        root_device: &str,
    ) -> Result<Vec<String>> {
        let _ = (block_device_mappings, root_device);
        Err(Error::not_supported(self.name(), "free_devices"))
    }

    /// Describe the instance this driver runs on
    async fn describe(&self) -> Result<BTreeMap<String, String>> {
        Err(Error::not_supported(self.name(), "describe"))
    }
}

pub type StorageOpsRef = Arc<dyn StorageOps>;
