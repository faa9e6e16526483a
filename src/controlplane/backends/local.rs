//! Local Block Storage Driver
//!
//! Keeps volumes in memory and hands out device paths from a fixed range on
//! the calling host. Provisioning is synchronous.

use crate::config::LocalDriverConfig;
use crate::domain::ports::{Disk, DiskSpec, Labels, ResourceHandle, StorageOps, VolumeStats};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

// =============================================================================
// Volume State
// =============================================================================

/// A volume or snapshot tracked by [`LocalOps`]
#[derive(Debug, Clone, Serialize)]
pub struct LocalVolume {
    pub id: String,
    pub spec: DiskSpec,
    pub labels: Labels,
    pub device_path: Option<String>,
    /// Source volume for snapshots
    pub parent: Option<String>,
    pub readonly: bool,
    pub created_at: DateTime<Utc>,
    pub stats: VolumeStats,
}

impl LocalVolume {
    fn new(spec: DiskSpec, labels: Labels) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            spec,
            labels,
            device_path: None,
            parent: None,
            readonly: false,
            created_at: Utc::now(),
            stats: VolumeStats::default(),
        }
    }

    fn matches(&self, labels: &Labels) -> bool {
        labels.iter().all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

// =============================================================================
// Local Driver
// =============================================================================

pub struct LocalOps {
    config: LocalDriverConfig,
    volumes: DashMap<String, LocalVolume>,
    snapshots: DashMap<String, LocalVolume>,
    /// Serializes device path assignment
    attach_lock: Mutex<()>,
}

impl LocalOps {
    pub fn new(config: LocalDriverConfig) -> Self {
        Self {
            config,
            volumes: DashMap::new(),
            snapshots: DashMap::new(),
            attach_lock: Mutex::new(()),
        }
    }

    fn candidate_devices(&self) -> Vec<String> {
        (self.config.first_device..=self.config.last_device)
            .map(|c| format!("{}{}", self.config.device_prefix, c))
            .collect()
    }

    fn to_disk(&self, volume: &LocalVolume) -> Disk {
        let handle = ResourceHandle::new(&volume.id);
        let mut disk = Disk::new(self.config.name.clone(), handle, volume.clone())
            .with_attribute("capacity_gb", volume.spec.capacity_gb.to_string())
            .with_attribute("storage_tier", volume.spec.storage_tier.to_string())
            .with_attribute("created_at", volume.created_at.to_rfc3339());
        if let Some(path) = &volume.device_path {
            disk = disk.with_attribute("device_path", path.clone());
        }
        if let Some(parent) = &volume.parent {
            disk = disk.with_attribute("parent", parent.clone());
        }
        disk
    }

    fn not_found(kind: &str, id: &str) -> Error {
        Error::ResourceNotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }

    fn lookup(&self, id: &str) -> Result<LocalVolume> {
        if let Some(v) = self.volumes.get(id) {
            return Ok(v.clone());
        }
        self.snapshots
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| Self::not_found("volume", id))
    }
}

fn device_name(path: &str) -> &str {
    path.strip_prefix("/dev/").unwrap_or(path)
}

#[async_trait]
impl StorageOps for LocalOps {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn create(&self, spec: &DiskSpec, labels: &Labels) -> Result<Disk> {
        spec.validate()?;
        let volume = LocalVolume::new(spec.clone(), labels.clone());
        info!(
            driver = %self.config.name,
            volume = %volume.id,
            capacity_gb = spec.capacity_gb,
            "Created local volume"
        );
        let disk = self.to_disk(&volume);
        self.volumes.insert(volume.id.clone(), volume);
        Ok(disk)
    }

    fn get_device_id(&self, disk: &Disk) -> Result<String> {
        disk.downcast_ref::<LocalVolume>()
            .map(|v| v.id.clone())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "resource {} was not produced by driver {}",
                    disk.handle(),
                    self.config.name
                ))
            })
    }

    async fn attach(&self, volume_id: &str) -> Result<String> {
        let _guard = self.attach_lock.lock();

        if let Some(path) = self
            .volumes
            .get(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?
            .device_path
            .clone()
        {
            return Ok(path);
        }

        let used: Vec<String> = self
            .volumes
            .iter()
            .filter_map(|v| v.device_path.clone())
            .collect();
        let path = self
            .candidate_devices()
            .into_iter()
            .filter(|p| p != &self.config.root_device)
            .find(|p| !used.contains(p))
            .ok_or_else(|| Error::Conflict("no free device paths".into()))?;

        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?;
        volume.device_path = Some(path.clone());
        debug!(volume = volume_id, device = %path, "Attached local volume");
        Ok(path)
    }

    async fn detach(&self, volume_id: &str) -> Result<()> {
        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?;
        volume.device_path = None;
        debug!(volume = volume_id, "Detached local volume");
        Ok(())
    }

    async fn delete(&self, volume_id: &str) -> Result<()> {
        let attached = self
            .volumes
            .get(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?
            .device_path
            .clone();
        if let Some(path) = attached {
            return Err(Error::Conflict(format!(
                "volume {} is attached at {}",
                volume_id, path
            )));
        }
        self.volumes.remove(volume_id);
        info!(driver = %self.config.name, volume = volume_id, "Deleted local volume");
        Ok(())
    }

    async fn snapshot(&self, volume_id: &str, readonly: bool) -> Result<Disk> {
        let source = self
            .volumes
            .get(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?
            .clone();

        let mut snap = LocalVolume::new(source.spec, source.labels);
        snap.parent = Some(volume_id.to_string());
        snap.readonly = readonly;
        snap.stats.used_bytes = source.stats.used_bytes;

        let disk = self.to_disk(&snap);
        debug!(volume = volume_id, snapshot = %snap.id, "Created local snapshot");
        self.snapshots.insert(snap.id.clone(), snap);
        Ok(disk)
    }

    async fn snapshot_delete(&self, snapshot_id: &str) -> Result<()> {
        self.snapshots
            .remove(snapshot_id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("snapshot", snapshot_id))
    }

    async fn restore(&self, volume_id: &str, snapshot_id: &str) -> Result<()> {
        let snap = self
            .snapshots
            .get(snapshot_id)
            .ok_or_else(|| Self::not_found("snapshot", snapshot_id))?
            .clone();
        if snap.parent.as_deref() != Some(volume_id) {
            return Err(Error::InvalidArgument(format!(
                "snapshot {} does not belong to volume {}",
                snapshot_id, volume_id
            )));
        }

        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?;
        volume.spec = snap.spec;
        volume.stats.used_bytes = snap.stats.used_bytes;
        info!(volume = volume_id, snapshot = snapshot_id, "Restored local volume");
        Ok(())
    }

    async fn inspect(&self, volume_ids: &[String]) -> Result<Vec<Disk>> {
        volume_ids
            .iter()
            .map(|id| self.lookup(id).map(|v| self.to_disk(&v)))
            .collect()
    }

    async fn enumerate(
        &self,
        volume_ids: &[String],
        labels: &Labels,
        set_identifier: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<Disk>>> {
        let mut matched: Vec<LocalVolume> = self
            .volumes
            .iter()
            .filter(|v| volume_ids.is_empty() || volume_ids.contains(&v.id))
            .filter(|v| v.matches(labels))
            .map(|v| v.clone())
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut groups: BTreeMap<String, Vec<Disk>> = BTreeMap::new();
        for volume in &matched {
            let key = set_identifier
                .and_then(|k| volume.labels.get(k))
                .cloned()
                .unwrap_or_default();
            groups.entry(key).or_default().push(self.to_disk(volume));
        }
        Ok(groups)
    }

    async fn stats(&self, volume_id: &str) -> Result<VolumeStats> {
        self.lookup(volume_id).map(|v| v.stats)
    }

    async fn tags(&self, volume_id: &str) -> Result<Labels> {
        self.lookup(volume_id).map(|v| v.labels)
    }

    async fn apply_tags(&self, volume_id: &str, labels: &Labels) -> Result<()> {
        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?;
        volume
            .labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn remove_tags(&self, volume_id: &str, labels: &Labels) -> Result<()> {
        let mut volume = self
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?;
        for key in labels.keys() {
            volume.labels.remove(key);
        }
        Ok(())
    }

    async fn device_mappings(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .volumes
            .iter()
            .filter_map(|v| v.device_path.clone().map(|p| (p, v.id.clone())))
            .collect())
    }

    async fn device_path(&self, volume_id: &str) -> Result<String> {
        self.volumes
            .get(volume_id)
            .ok_or_else(|| Self::not_found("volume", volume_id))?
            .device_path
            .clone()
            .ok_or_else(|| Error::InvalidArgument(format!("volume {} is not attached", volume_id)))
    }

    async fn free_devices(
        &self,
        block_device_mappings: &[String],
        root_device: &str,
    ) -> Result<Vec<String>> {
        let attached: Vec<String> = self
            .volumes
            .iter()
            .filter_map(|v| v.device_path.clone())
            .collect();

        Ok(self
            .candidate_devices()
            .into_iter()
            .filter(|p| device_name(p) != device_name(root_device))
            .filter(|p| {
                !block_device_mappings
                    .iter()
                    .any(|m| device_name(m) == device_name(p))
            })
            .filter(|p| !attached.contains(p))
            .collect())
    }

    async fn describe(&self) -> Result<BTreeMap<String, String>> {
        let mut description = BTreeMap::new();
        description.insert("driver".to_string(), self.config.name.clone());
        description.insert("device_prefix".to_string(), self.config.device_prefix.clone());
        description.insert("root_device".to_string(), self.config.root_device.clone());
        description.insert("volumes".to_string(), self.volumes.len().to_string());
        description.insert("snapshots".to_string(), self.snapshots.len().to_string());
        Ok(description)
    }
}
