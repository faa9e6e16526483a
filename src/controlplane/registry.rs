//! Driver Registry
//!
//! Maps logical driver names to their [`StorageOps`] implementations.
//! Populated once at startup and read-only afterwards; the lock only guards
//! against a late or concurrent registration corrupting the map.

use crate::domain::ports::{StorageOps, StorageOpsRef};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, StorageOpsRef>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `ops` under `name`; a name may only be taken once
    pub fn register(&self, name: impl Into<String>, ops: Arc<dyn StorageOps>) -> Result<()> {
        let name = name.into();
        let mut drivers = self.drivers.write();
        if drivers.contains_key(&name) {
            return Err(Error::DriverAlreadyRegistered { name });
        }
        info!(driver = %name, implementation = ops.name(), "Registered storage driver");
        drivers.insert(name, ops);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<StorageOpsRef> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DriverNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }
}
