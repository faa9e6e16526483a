//! SKU / price selection
//!
//! Translates a [`DiskSpec`] into the ordered price lines an order needs.
//! Every lookup is a linear first-match scan: catalogs contain overlapping
//! ranges, and the first item in vendor order wins. No scoring.

use crate::domain::ports::{DiskSpec, StorageTier};
use crate::error::{Error, Result};
use crate::pricing::catalog::{
    CatalogItem, EnduranceTier, ItemPrice, StorageProtocol, CATEGORY_PERFORMANCE_IOPS,
    CATEGORY_PERFORMANCE_SPACE, CATEGORY_SNAPSHOT_SPACE, CATEGORY_STORAGE_AS_A_SERVICE,
    CATEGORY_TIER_LEVEL, RESTRICTION_IOPS, RESTRICTION_STORAGE_SPACE, RESTRICTION_TIER_LEVEL,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// Selection Result
// =============================================================================

/// Role of a selected price line in the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceComponent {
    Service,
    Protocol,
    Space,
    Iops,
    TierLevel,
    SnapshotSpace,
}

impl std::fmt::Display for PriceComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PriceComponent::Service => "service",
            PriceComponent::Protocol => "protocol",
            PriceComponent::Space => "space",
            PriceComponent::Iops => "iops",
            PriceComponent::TierLevel => "tier level",
            PriceComponent::SnapshotSpace => "snapshot space",
        };
        f.write_str(label)
    }
}

/// A resolved order line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub component: PriceComponent,
    pub price: ItemPrice,
}

/// Ordered price lines for one disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSelection {
    pub lines: Vec<PricedLine>,
}

impl PriceSelection {
    fn push(&mut self, component: PriceComponent, price: ItemPrice) {
        debug!(%component, price_id = price.id, "Selected price");
        self.lines.push(PricedLine { component, price });
    }

    pub fn price_ids(&self) -> Vec<u64> {
        self.lines.iter().map(|line| line.price.id).collect()
    }

    pub fn component(&self, component: PriceComponent) -> Option<&ItemPrice> {
        self.lines
            .iter()
            .find(|line| line.component == component)
            .map(|line| &line.price)
    }

    pub fn count(&self, component: PriceComponent) -> usize {
        self.lines.iter().filter(|line| line.component == component).count()
    }

    pub fn into_prices(self) -> Vec<ItemPrice> {
        self.lines.into_iter().map(|line| line.price).collect()
    }
}

/// Restriction a snapshot price must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotRestriction {
    /// Performance disks key snapshot prices on provisioned IOPS
    Iops(u64),
    /// Endurance disks key snapshot prices on the tier capacity restriction
    TierLevel(u64),
}

impl SnapshotRestriction {
    fn as_pair(&self) -> (&'static str, u64) {
        match self {
            SnapshotRestriction::Iops(value) => (RESTRICTION_IOPS, *value),
            SnapshotRestriction::TierLevel(value) => (RESTRICTION_TIER_LEVEL, *value),
        }
    }
}

// =============================================================================
// Primitive Lookups
// =============================================================================

/// First price of `category` that is not location-bound and, when a
/// restriction with a positive value is given, whose restriction range of
/// the same type contains the value.
pub fn find_price<'a>(
    prices: &'a [ItemPrice],
    category: &str,
    restriction: Option<(&str, u64)>,
) -> Option<&'a ItemPrice> {
    prices.iter().find(|price| {
        if price.location_group_id.is_some() || price.primary_category() != Some(category) {
            return false;
        }

        match restriction {
            Some((restriction_type, value)) if value > 0 => {
                let min = price.capacity_restriction_minimum.unwrap_or(0);
                let max = price.capacity_restriction_maximum.unwrap_or(0);
                price.capacity_restriction_type.as_deref() == Some(restriction_type)
                    && value >= min
                    && value <= max
            }
            _ => true,
        }
    })
}

/// First unrestricted price of `category` across all items
pub fn price_by_category(items: &[CatalogItem], category: &str) -> Result<ItemPrice> {
    items
        .iter()
        .find_map(|item| find_price(&item.prices, category, None))
        .cloned()
        .ok_or_else(|| Error::PriceNotFound {
            component: format!("category {}", category),
            detail: "no product item carries this category".into(),
        })
}

/// Capacity price for performance disks.
///
/// The item's key must encode the same range it declares, which rejects
/// catalog rows whose ranges overlap but whose keys disagree.
pub fn performance_space_price(items: &[CatalogItem], capacity_gb: u64) -> Result<ItemPrice> {
    items
        .iter()
        .filter(|item| item.category_allows(CATEGORY_PERFORMANCE_SPACE))
        .filter_map(|item| item.range().map(|range| (item, range)))
        .filter(|(_, (min, max))| capacity_gb >= *min && capacity_gb <= *max)
        .filter(|(item, (min, max))| item.key_name == format!("{}_{}_GBS", min, max))
        .find_map(|(item, _)| find_price(&item.prices, CATEGORY_PERFORMANCE_SPACE, None))
        .cloned()
        .ok_or_else(|| Error::PriceNotFound {
            component: "performance storage space".into(),
            detail: format!("capacity {} GB", capacity_gb),
        })
}

/// IOPS price for performance disks, restricted to the chosen capacity
pub fn performance_iops_price(
    items: &[CatalogItem],
    capacity_gb: u64,
    iops: u64,
) -> Result<ItemPrice> {
    items
        .iter()
        .filter(|item| item.category_allows(CATEGORY_PERFORMANCE_IOPS))
        .filter_map(|item| item.range().map(|range| (item, range)))
        .filter(|(_, (min, max))| iops >= *min && iops <= *max)
        .find_map(|(item, _)| {
            find_price(
                &item.prices,
                CATEGORY_PERFORMANCE_IOPS,
                Some((RESTRICTION_STORAGE_SPACE, capacity_gb)),
            )
        })
        .cloned()
        .ok_or_else(|| Error::PriceNotFound {
            component: "performance storage iops".into(),
            detail: format!("{} IOPS on {} GB", iops, capacity_gb),
        })
}

/// Capacity price for endurance disks, keyed by the tier's space item
pub fn endurance_space_price(
    items: &[CatalogItem],
    capacity_gb: u64,
    tier: EnduranceTier,
) -> Result<ItemPrice> {
    let key_name = tier.space_key_name();

    items
        .iter()
        .filter(|item| item.key_name == key_name)
        .filter_map(|item| item.range().map(|range| (item, range)))
        .filter(|(_, (min, max))| capacity_gb >= *min && capacity_gb <= *max)
        .find_map(|(item, _)| find_price(&item.prices, CATEGORY_PERFORMANCE_SPACE, None))
        .cloned()
        .ok_or_else(|| Error::PriceNotFound {
            component: "endurance storage space".into(),
            detail: format!("capacity {} GB for {}", capacity_gb, key_name),
        })
}

/// Tier-level price for endurance disks
pub fn endurance_tier_price(items: &[CatalogItem], tier: EnduranceTier) -> Result<ItemPrice> {
    let target = tier.capacity_restriction();

    items
        .iter()
        .filter(|item| item.category_allows(CATEGORY_TIER_LEVEL))
        .filter(|item| item.whole_capacity() == Some(target))
        .find_map(|item| find_price(&item.prices, CATEGORY_TIER_LEVEL, None))
        .cloned()
        .ok_or_else(|| Error::PriceNotFound {
            component: "endurance tier level".into(),
            detail: format!("{} (capacity {})", tier.key_name(), target),
        })
}

/// Snapshot reservation price
pub fn snapshot_space_price(
    items: &[CatalogItem],
    snapshot_gb: u64,
    restriction: SnapshotRestriction,
) -> Result<ItemPrice> {
    let restriction_pair = restriction.as_pair();

    items
        .iter()
        .filter(|item| item.whole_capacity() == Some(snapshot_gb))
        .find_map(|item| find_price(&item.prices, CATEGORY_SNAPSHOT_SPACE, Some(restriction_pair)))
        .cloned()
        .ok_or_else(|| Error::PriceNotFound {
            component: "snapshot space".into(),
            detail: format!(
                "{} GB restricted by {} {}",
                snapshot_gb, restriction_pair.0, restriction_pair.1
            ),
        })
}

// =============================================================================
// Full Selection
// =============================================================================

/// Provisioned IOPS of a performance disk; must be a whole positive number
pub fn performance_iops(spec: &DiskSpec) -> Result<u64> {
    let iops = spec.iops_per_gb;
    if !iops.is_finite() || iops < 1.0 || iops.fract() != 0.0 {
        return Err(Error::InvalidArgument(format!(
            "performance IOPS must be a positive whole number, got {}",
            iops
        )));
    }
    Ok(iops as u64)
}

/// Resolve every price line a `DiskSpec` needs, in order.
///
/// Fails on the first line that cannot be priced; no partial selection is
/// ever returned.
pub fn select_prices(
    items: &[CatalogItem],
    spec: &DiskSpec,
    protocol: StorageProtocol,
) -> Result<PriceSelection> {
    spec.validate()?;

    let mut selection = PriceSelection::default();
    selection.push(
        PriceComponent::Service,
        price_by_category(items, CATEGORY_STORAGE_AS_A_SERVICE)?,
    );
    selection.push(
        PriceComponent::Protocol,
        price_by_category(items, &protocol.category_code())?,
    );

    let snapshot_restriction = match spec.storage_tier {
        StorageTier::Performance => {
            let iops = performance_iops(spec)?;
            selection.push(
                PriceComponent::Space,
                performance_space_price(items, spec.capacity_gb)?,
            );
            selection.push(
                PriceComponent::Iops,
                performance_iops_price(items, spec.capacity_gb, iops)?,
            );
            SnapshotRestriction::Iops(iops)
        }
        StorageTier::Endurance => {
            let tier = EnduranceTier::from_iops(spec.iops_per_gb)?;
            selection.push(
                PriceComponent::Space,
                endurance_space_price(items, spec.capacity_gb, tier)?,
            );
            selection.push(PriceComponent::TierLevel, endurance_tier_price(items, tier)?);
            SnapshotRestriction::TierLevel(tier.capacity_restriction())
        }
    };

    if spec.snapshot_reserve_gb > 0 {
        selection.push(
            PriceComponent::SnapshotSpace,
            snapshot_space_price(items, spec.snapshot_reserve_gb, snapshot_restriction)?,
        );
    }

    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::catalog::CatalogItem;
    use assert_matches::assert_matches;

    fn fixture() -> Vec<CatalogItem> {
        vec![
            CatalogItem::new(1, "STORAGE_AS_A_SERVICE")
                .with_category(CATEGORY_STORAGE_AS_A_SERVICE)
                .with_price(ItemPrice::new(1001, CATEGORY_STORAGE_AS_A_SERVICE)),
            CatalogItem::new(2, "BLOCK_STORAGE_2")
                .with_category("storage_block")
                .with_price(ItemPrice::new(1002, "storage_block")),
            // Overlapping range whose key does not encode it; must be skipped
            CatalogItem::new(3, "BOGUS_GBS")
                .with_category(CATEGORY_PERFORMANCE_SPACE)
                .with_range(1, 1000)
                .with_price(ItemPrice::new(1003, CATEGORY_PERFORMANCE_SPACE)),
            CatalogItem::new(4, "80_100_GBS")
                .with_category(CATEGORY_PERFORMANCE_SPACE)
                .with_range(80, 100)
                .with_price(ItemPrice::new(1004, CATEGORY_PERFORMANCE_SPACE)),
            CatalogItem::new(5, "100_1000_IOPS")
                .with_category(CATEGORY_PERFORMANCE_IOPS)
                .with_range(100, 1000)
                .with_price(
                    ItemPrice::new(1005, CATEGORY_PERFORMANCE_IOPS)
                        .restricted(RESTRICTION_STORAGE_SPACE, 1, 79),
                )
                .with_price(
                    ItemPrice::new(1006, CATEGORY_PERFORMANCE_IOPS)
                        .restricted(RESTRICTION_STORAGE_SPACE, 80, 2000),
                ),
            CatalogItem::new(6, "STORAGE_SPACE_FOR_2_IOPS_PER_GB")
                .with_range(1, 12000)
                .with_price(ItemPrice::new(1007, CATEGORY_PERFORMANCE_SPACE).in_location_group(9))
                .with_price(ItemPrice::new(1008, CATEGORY_PERFORMANCE_SPACE)),
            CatalogItem::new(7, "LOW_INTENSITY_TIER")
                .with_category(CATEGORY_TIER_LEVEL)
                .with_capacity(100.0)
                .with_price(ItemPrice::new(1009, CATEGORY_TIER_LEVEL)),
            CatalogItem::new(8, "READHEAVY_TIER")
                .with_category(CATEGORY_TIER_LEVEL)
                .with_capacity(200.0)
                .with_price(ItemPrice::new(1010, CATEGORY_TIER_LEVEL)),
            CatalogItem::new(9, "50_GB_SNAPSHOT")
                .with_category(CATEGORY_SNAPSHOT_SPACE)
                .with_capacity(50.0)
                .with_price(
                    ItemPrice::new(1011, CATEGORY_SNAPSHOT_SPACE)
                        .restricted(RESTRICTION_TIER_LEVEL, 200, 200),
                )
                .with_price(
                    ItemPrice::new(1012, CATEGORY_SNAPSHOT_SPACE)
                        .restricted(RESTRICTION_IOPS, 100, 6000),
                ),
        ]
    }

    #[test]
    fn test_endurance_selection() {
        let spec = DiskSpec::new(StorageTier::Endurance, 2.0, 100);
        let selection = select_prices(&fixture(), &spec, StorageProtocol::Block).unwrap();

        assert_eq!(selection.price_ids(), vec![1001, 1002, 1008, 1010]);
        let tier_price = selection.component(PriceComponent::TierLevel).unwrap();
        assert_eq!(tier_price.id, 1010);
        assert_eq!(selection.count(PriceComponent::SnapshotSpace), 0);
    }

    #[test]
    fn test_endurance_unknown_tier_is_invalid_argument() {
        let spec = DiskSpec::new(StorageTier::Endurance, 3.0, 100);
        let err = select_prices(&fixture(), &spec, StorageProtocol::Block).unwrap_err();

        assert_matches!(err, Error::InvalidArgument(_));
    }

    #[test]
    fn test_performance_space_requires_matching_key() {
        let price = performance_space_price(&fixture(), 90).unwrap();
        assert_eq!(price.id, 1004);

        // Only the bogus item covers 500 GB, and its key does not match
        let err = performance_space_price(&fixture(), 500).unwrap_err();
        assert_matches!(err, Error::PriceNotFound { .. });
    }

    #[test]
    fn test_performance_iops_respects_capacity_restriction() {
        assert_eq!(performance_iops_price(&fixture(), 90, 500).unwrap().id, 1006);
        assert_eq!(performance_iops_price(&fixture(), 40, 500).unwrap().id, 1005);
        assert!(performance_iops_price(&fixture(), 90, 5000).is_err());
    }

    #[test]
    fn test_snapshot_keyed_on_iops_for_performance() {
        let spec = DiskSpec::new(StorageTier::Performance, 500.0, 90).with_snapshot_reserve(50);
        let selection = select_prices(&fixture(), &spec, StorageProtocol::Block).unwrap();

        let snapshot = selection.component(PriceComponent::SnapshotSpace).unwrap();
        assert_eq!(snapshot.id, 1012);
        assert_eq!(snapshot.capacity_restriction_type.as_deref(), Some(RESTRICTION_IOPS));
    }

    #[test]
    fn test_snapshot_keyed_on_tier_for_endurance() {
        let spec = DiskSpec::new(StorageTier::Endurance, 2.0, 100).with_snapshot_reserve(50);
        let selection = select_prices(&fixture(), &spec, StorageProtocol::Block).unwrap();

        assert_eq!(selection.component(PriceComponent::SnapshotSpace).unwrap().id, 1011);
        assert_eq!(selection.count(PriceComponent::SnapshotSpace), 1);
    }

    #[test]
    fn test_missing_component_fails_whole_selection() {
        let items: Vec<_> = fixture().into_iter().filter(|item| item.id != 2).collect();
        let spec = DiskSpec::new(StorageTier::Endurance, 2.0, 100);

        let err = select_prices(&items, &spec, StorageProtocol::Block).unwrap_err();
        assert_matches!(err, Error::PriceNotFound { .. });
    }

    #[test]
    fn test_location_bound_prices_are_skipped() {
        let price = endurance_space_price(&fixture(), 100, EnduranceTier::ReadHeavy).unwrap();
        assert_eq!(price.id, 1008);
    }

    #[test]
    fn test_first_match_wins_on_overlap() {
        let items = vec![
            CatalogItem::new(1, "READHEAVY_TIER")
                .with_category(CATEGORY_TIER_LEVEL)
                .with_capacity(200.0)
                .with_price(ItemPrice::new(11, CATEGORY_TIER_LEVEL)),
            CatalogItem::new(2, "READHEAVY_TIER_DUP")
                .with_category(CATEGORY_TIER_LEVEL)
                .with_capacity(200.0)
                .with_price(ItemPrice::new(22, CATEGORY_TIER_LEVEL)),
        ];

        assert_eq!(endurance_tier_price(&items, EnduranceTier::ReadHeavy).unwrap().id, 11);
    }

    #[test]
    fn test_performance_iops_must_be_whole() {
        let spec = DiskSpec::new(StorageTier::Performance, 250.5, 90);
        assert_matches!(performance_iops(&spec), Err(Error::InvalidArgument(_)));
    }
}
