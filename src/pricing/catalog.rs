//! Vendor product catalog model
//!
//! Catalog items are read-only reference data fetched from the vendor once
//! per operation. Numeric range bounds arrive as strings on the wire and are
//! parsed by the vendor client before they reach this module.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Category Codes
// =============================================================================

/// Base storage-as-a-service line, required on every order
pub const CATEGORY_STORAGE_AS_A_SERVICE: &str = "storage_as_a_service";
/// Prefix of the protocol category (`storage_block`, `storage_file`)
pub const CATEGORY_PROTOCOL_PREFIX: &str = "storage_";
/// Capacity line for both tiers
pub const CATEGORY_PERFORMANCE_SPACE: &str = "performance_storage_space";
/// IOPS line for the performance tier
pub const CATEGORY_PERFORMANCE_IOPS: &str = "performance_storage_iops";
/// Tier-level line for the endurance tier
pub const CATEGORY_TIER_LEVEL: &str = "storage_tier_level";
/// Snapshot reservation line
pub const CATEGORY_SNAPSHOT_SPACE: &str = "storage_snapshot_space";

/// Restriction types carried by prices
pub const RESTRICTION_STORAGE_SPACE: &str = "STORAGE_SPACE";
pub const RESTRICTION_IOPS: &str = "IOPS";
pub const RESTRICTION_TIER_LEVEL: &str = "STORAGE_TIER_LEVEL";

/// Storage protocol an order is placed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProtocol {
    Block,
    File,
}

impl StorageProtocol {
    pub fn category_code(&self) -> String {
        match self {
            StorageProtocol::Block => format!("{}block", CATEGORY_PROTOCOL_PREFIX),
            StorageProtocol::File => format!("{}file", CATEGORY_PROTOCOL_PREFIX),
        }
    }
}

// =============================================================================
// Catalog Types
// =============================================================================

/// One price of a catalog item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPrice {
    pub id: u64,
    /// Category codes; the first one classifies the price
    pub categories: Vec<String>,
    /// Location-specific prices are never selected
    #[serde(default)]
    pub location_group_id: Option<u64>,
    #[serde(default)]
    pub capacity_restriction_type: Option<String>,
    #[serde(default)]
    pub capacity_restriction_minimum: Option<u64>,
    #[serde(default)]
    pub capacity_restriction_maximum: Option<u64>,
}

impl ItemPrice {
    pub fn new(id: u64, category: impl Into<String>) -> Self {
        Self {
            id,
            categories: vec![category.into()],
            location_group_id: None,
            capacity_restriction_type: None,
            capacity_restriction_minimum: None,
            capacity_restriction_maximum: None,
        }
    }

    pub fn restricted(mut self, restriction_type: impl Into<String>, min: u64, max: u64) -> Self {
        self.capacity_restriction_type = Some(restriction_type.into());
        self.capacity_restriction_minimum = Some(min);
        self.capacity_restriction_maximum = Some(max);
        self
    }

    pub fn in_location_group(mut self, group_id: u64) -> Self {
        self.location_group_id = Some(group_id);
        self
    }

    pub fn primary_category(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }
}

/// A priced product line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: u64,
    pub key_name: String,
    #[serde(default)]
    pub description: String,
    /// Fixed capacity of the item (tier level, snapshot size)
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub capacity_minimum: Option<u64>,
    #[serde(default)]
    pub capacity_maximum: Option<u64>,
    /// Item category; items without one are not excluded by category filters
    #[serde(default)]
    pub category_code: Option<String>,
    #[serde(default)]
    pub prices: Vec<ItemPrice>,
}

impl CatalogItem {
    pub fn new(id: u64, key_name: impl Into<String>) -> Self {
        Self {
            id,
            key_name: key_name.into(),
            description: String::new(),
            capacity: None,
            capacity_minimum: None,
            capacity_maximum: None,
            category_code: None,
            prices: Vec::new(),
        }
    }

    pub fn with_category(mut self, category_code: impl Into<String>) -> Self {
        self.category_code = Some(category_code.into());
        self
    }

    pub fn with_range(mut self, min: u64, max: u64) -> Self {
        self.capacity_minimum = Some(min);
        self.capacity_maximum = Some(max);
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_price(mut self, price: ItemPrice) -> Self {
        self.prices.push(price);
        self
    }

    /// True unless the item declares a different category
    pub fn category_allows(&self, category: &str) -> bool {
        self.category_code.as_deref().map_or(true, |code| code == category)
    }

    /// Inclusive range bounds, if the item declares both
    pub fn range(&self) -> Option<(u64, u64)> {
        match (self.capacity_minimum, self.capacity_maximum) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Fixed capacity truncated to an integer, as vendors compare it
    pub fn whole_capacity(&self) -> Option<u64> {
        self.capacity.filter(|c| *c >= 0.0).map(|c| c.trunc() as u64)
    }
}

// =============================================================================
// Endurance Tiers
// =============================================================================

/// Discrete IOPS-per-GB classes of endurance storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnduranceTier {
    /// 0.25 IOPS/GB
    LowIntensity,
    /// 2 IOPS/GB
    ReadHeavy,
    /// 4 IOPS/GB
    WriteHeavy,
    /// 10 IOPS/GB
    TenIopsPerGb,
}

impl EnduranceTier {
    pub const ALL: [EnduranceTier; 4] = [
        EnduranceTier::LowIntensity,
        EnduranceTier::ReadHeavy,
        EnduranceTier::WriteHeavy,
        EnduranceTier::TenIopsPerGb,
    ];

    /// Resolve an IOPS-per-GB value; values outside the table are rejected
    pub fn from_iops(iops_per_gb: f64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.iops_per_gb() == iops_per_gb)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unsupported endurance IOPS per GB {}, expected one of 0.25, 2, 4, 10",
                    iops_per_gb
                ))
            })
    }

    pub fn iops_per_gb(&self) -> f64 {
        match self {
            EnduranceTier::LowIntensity => 0.25,
            EnduranceTier::ReadHeavy => 2.0,
            EnduranceTier::WriteHeavy => 4.0,
            EnduranceTier::TenIopsPerGb => 10.0,
        }
    }

    /// Key name of the tier's product item
    pub fn key_name(&self) -> &'static str {
        match self {
            EnduranceTier::LowIntensity => "LOW_INTENSITY_TIER",
            EnduranceTier::ReadHeavy => "READHEAVY_TIER",
            EnduranceTier::WriteHeavy => "WRITEHEAVY_TIER",
            EnduranceTier::TenIopsPerGb => "10_IOPS_PER_GB",
        }
    }

    /// Restriction value tier-level and snapshot prices are keyed on
    pub fn capacity_restriction(&self) -> u64 {
        match self {
            EnduranceTier::LowIntensity => 100,
            EnduranceTier::ReadHeavy => 200,
            EnduranceTier::WriteHeavy => 300,
            EnduranceTier::TenIopsPerGb => 1000,
        }
    }

    /// Key name of the space item sized for this tier
    pub fn space_key_name(&self) -> &'static str {
        match self {
            EnduranceTier::LowIntensity => "STORAGE_SPACE_FOR_0_25_IOPS_PER_GB",
            EnduranceTier::ReadHeavy => "STORAGE_SPACE_FOR_2_IOPS_PER_GB",
            EnduranceTier::WriteHeavy => "STORAGE_SPACE_FOR_4_IOPS_PER_GB",
            EnduranceTier::TenIopsPerGb => "STORAGE_SPACE_FOR_10_IOPS_PER_GB",
        }
    }
}
