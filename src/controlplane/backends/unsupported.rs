//! Stub driver for providers that are compiled in but not implemented

use crate::domain::ports::StorageOps;
use async_trait::async_trait;

/// Driver whose every capability reports `NotSupported`
#[derive(Debug, Clone)]
pub struct UnsupportedOps {
    name: String,
}

impl UnsupportedOps {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl StorageOps for UnsupportedOps {
    fn name(&self) -> &str {
        &self.name
    }
}
