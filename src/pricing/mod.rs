//! Price/SKU selection
//!
//! Maps a [`DiskSpec`](crate::domain::DiskSpec) onto the set of catalog
//! price ids a vendor order requires.

pub mod catalog;
pub mod selector;

pub use catalog::{CatalogItem, EnduranceTier, ItemPrice, StorageProtocol};
pub use selector::{select_prices, PriceComponent, PriceSelection, PricedLine};
