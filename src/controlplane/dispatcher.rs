//! Request Dispatcher
//!
//! Picks the driver for an inbound operation and delegates to it. The
//! precedence, first hit wins:
//!
//! 1. first `/`-separated token of the caller identifier
//! 2. `<base>-sched`
//! 3. `<base>`

use crate::controlplane::registry::DriverRegistry;
use crate::domain::ports::{Disk, DiskSpec, Labels, StorageOpsRef, VolumeStats};
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::Metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Suffix of the scheduler-flavored variant of a driver
pub const SCHEDULER_SUFFIX: &str = "-sched";

/// Separator between a client name and its version in caller identifiers
pub const CLIENT_ID_SEPARATOR: char = '/';

// =============================================================================
// Operations
// =============================================================================

/// An inbound storage operation with its typed parameters
#[derive(Debug, Clone)]
pub enum Operation {
    Create { spec: DiskSpec, labels: Labels },
    Attach { volume_id: String },
    Detach { volume_id: String },
    Delete { volume_id: String },
    Snapshot { volume_id: String, readonly: bool },
    SnapshotDelete { snapshot_id: String },
    Restore { volume_id: String, snapshot_id: String },
    Inspect { volume_ids: Vec<String> },
    Enumerate {
        volume_ids: Vec<String>,
        labels: Labels,
        set_identifier: Option<String>,
    },
    Stats { volume_id: String },
    Tags { volume_id: String },
    ApplyTags { volume_id: String, labels: Labels },
    RemoveTags { volume_id: String, labels: Labels },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Attach { .. } => "attach",
            Operation::Detach { .. } => "detach",
            Operation::Delete { .. } => "delete",
            Operation::Snapshot { .. } => "snapshot",
            Operation::SnapshotDelete { .. } => "snapshot_delete",
            Operation::Restore { .. } => "restore",
            Operation::Inspect { .. } => "inspect",
            Operation::Enumerate { .. } => "enumerate",
            Operation::Stats { .. } => "stats",
            Operation::Tags { .. } => "tags",
            Operation::ApplyTags { .. } => "apply_tags",
            Operation::RemoveTags { .. } => "remove_tags",
        }
    }
}

/// Result of an executed [`Operation`]
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Created(Disk),
    Attached { device_path: String },
    Snapshot(Disk),
    Volumes(Vec<Disk>),
    Grouped(BTreeMap<String, Vec<Disk>>),
    Stats(VolumeStats),
    Tags(Labels),
    Done,
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct Dispatcher {
    registry: Arc<DriverRegistry>,
    base_name: String,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<DriverRegistry>,
        base_name: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            base_name: base_name.into(),
            metrics,
        }
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Resolve the driver serving `client_id`
    pub fn resolve(&self, client_id: Option<&str>) -> Result<StorageOpsRef> {
        if let Some(client) = client_id
            .and_then(|id| id.split(CLIENT_ID_SEPARATOR).next())
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            if let Ok(ops) = self.registry.get(client) {
                debug!(driver = client, "Resolved driver from caller identifier");
                return Ok(ops);
            }
        }

        let scheduler = format!("{}{}", self.base_name, SCHEDULER_SUFFIX);
        if let Ok(ops) = self.registry.get(&scheduler) {
            debug!(driver = %scheduler, "Resolved scheduler driver");
            return Ok(ops);
        }

        self.registry.get(&self.base_name).map_err(|_| Error::DriverNotFound {
            name: match client_id {
                Some(id) => format!("{} (client {})", self.base_name, id),
                None => self.base_name.clone(),
            },
        })
    }

    /// Resolve a driver and run `op` on it
    pub async fn execute(
        &self,
        client_id: Option<&str>,
        op: Operation,
    ) -> Result<OperationOutcome> {
        let ops = self.resolve(client_id)?;
        let operation = op.name();
        let start = Instant::now();

        let result = run(&ops, op).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        self.metrics
            .record_operation(ops.name(), operation, outcome, start.elapsed());

        match &result {
            Ok(_) => info!(driver = ops.name(), operation, "Operation completed"),
            Err(e) if e.kind() == ErrorKind::NotSupported => {
                debug!(driver = ops.name(), operation, "Operation not supported")
            }
            Err(e) => warn!(driver = ops.name(), operation, error = %e, "Operation failed"),
        }

        result
    }
}

async fn run(ops: &StorageOpsRef, op: Operation) -> Result<OperationOutcome> {
    Ok(match op {
        Operation::Create { spec, labels } => {
            OperationOutcome::Created(ops.create(&spec, &labels).await?)
        }
        Operation::Attach { volume_id } => OperationOutcome::Attached {
            device_path: ops.attach(&volume_id).await?,
        },
        Operation::Detach { volume_id } => {
            ops.detach(&volume_id).await?;
            OperationOutcome::Done
        }
        Operation::Delete { volume_id } => {
            ops.delete(&volume_id).await?;
            OperationOutcome::Done
        }
        Operation::Snapshot { volume_id, readonly } => {
            OperationOutcome::Snapshot(ops.snapshot(&volume_id, readonly).await?)
        }
        Operation::SnapshotDelete { snapshot_id } => {
            ops.snapshot_delete(&snapshot_id).await?;
            OperationOutcome::Done
        }
        Operation::Restore {
            volume_id,
            snapshot_id,
        } => {
            ops.restore(&volume_id, &snapshot_id).await?;
            OperationOutcome::Done
        }
        Operation::Inspect { volume_ids } => {
            OperationOutcome::Volumes(ops.inspect(&volume_ids).await?)
        }
        Operation::Enumerate {
            volume_ids,
            labels,
            set_identifier,
        } => OperationOutcome::Grouped(
            ops.enumerate(&volume_ids, &labels, set_identifier.as_deref())
                .await?,
        ),
        Operation::Stats { volume_id } => OperationOutcome::Stats(ops.stats(&volume_id).await?),
        Operation::Tags { volume_id } => OperationOutcome::Tags(ops.tags(&volume_id).await?),
        Operation::ApplyTags { volume_id, labels } => {
            ops.apply_tags(&volume_id, &labels).await?;
            OperationOutcome::Done
        }
        Operation::RemoveTags { volume_id, labels } => {
            ops.remove_tags(&volume_id, &labels).await?;
            OperationOutcome::Done
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalDriverConfig;
    use crate::controlplane::backends::{LocalOps, UnsupportedOps};
    use crate::domain::ports::StorageTier;
    use assert_matches::assert_matches;

    fn dispatcher(names: &[&str]) -> Dispatcher {
        let registry = Arc::new(DriverRegistry::new());
        for name in names {
            registry
                .register(*name, Arc::new(UnsupportedOps::new(*name)))
                .unwrap();
        }
        Dispatcher::new(registry, "base", Arc::new(Metrics::new().unwrap()))
    }

    #[test]
    fn test_client_identifier_wins() {
        let d = dispatcher(&["X", "base-sched", "base"]);
        assert_eq!(d.resolve(Some("X/1.0")).unwrap().name(), "X");
    }

    #[test]
    fn test_scheduler_variant_before_base() {
        let d = dispatcher(&["base-sched", "base"]);
        assert_eq!(d.resolve(Some("X/1.0")).unwrap().name(), "base-sched");
        assert_eq!(d.resolve(None).unwrap().name(), "base-sched");
    }

    #[test]
    fn test_base_fallback() {
        let d = dispatcher(&["base"]);
        assert_eq!(d.resolve(Some("X/1.0")).unwrap().name(), "base");
        assert_eq!(d.resolve(Some("")).unwrap().name(), "base");
    }

    #[test]
    fn test_no_match_is_not_found() {
        let d = dispatcher(&["other"]);
        let err = d.resolve(Some("X/1.0")).map(|_| ()).unwrap_err();
        assert_matches!(err, Error::DriverNotFound { .. });
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_execute_not_supported_is_distinct() {
        let d = dispatcher(&["base"]);
        let err = d
            .execute(None, Operation::Attach { volume_id: "v".into() })
            .await
            .unwrap_err();

        assert!(err.is_not_supported());
        assert_eq!(d.metrics().operation_count("base", "attach", "not_supported"), 1);
    }

    #[tokio::test]
    async fn test_execute_create_and_attach() {
        let registry = Arc::new(DriverRegistry::new());
        registry
            .register(
                "base",
                Arc::new(LocalOps::new(LocalDriverConfig {
                    name: "base".into(),
                    ..Default::default()
                })),
            )
            .unwrap();
        let d = Dispatcher::new(registry, "base", Arc::new(Metrics::new().unwrap()));

        let created = d
            .execute(
                Some("kubelet/1.29"),
                Operation::Create {
                    spec: DiskSpec::new(StorageTier::Endurance, 2.0, 20),
                    labels: Labels::new(),
                },
            )
            .await
            .unwrap();
        let disk = assert_matches!(created, OperationOutcome::Created(disk) => disk);

        let attached = d
            .execute(
                None,
                Operation::Attach {
                    volume_id: disk.handle().to_string(),
                },
            )
            .await
            .unwrap();
        assert_matches!(
            attached,
            OperationOutcome::Attached { device_path } if device_path == "/dev/xvdf"
        );
        assert_eq!(d.metrics().operation_count("base", "create", "ok"), 1);
    }
}
