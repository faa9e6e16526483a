//! Storage Ops - Pluggable Block-Storage Provisioning
//!
//! A control plane that routes volume lifecycle requests to named storage
//! drivers. Drivers implement a common capability contract; vendor-backed
//! drivers order storage asynchronously and poll it to completion.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     REST API (axum)                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Dispatcher: caller id → <base>-sched → <base>              │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Driver Registry (name → StorageOps)                        │
//! ├───────────────────┬──────────────────┬───────────────────────┤
//! │      Local        │    SoftLayer     │     Unsupported       │
//! │  (host devices)   │  (vendor orders) │  (name only)          │
//! │                   ├──────────────────┤                       │
//! │                   │ Price Selector   │                       │
//! │                   │ State Machine    │                       │
//! └───────────────────┴──────────────────┴───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: registry, dispatcher, drivers and the REST API
//! - [`domain`]: the storage-ops contract
//! - [`pricing`]: catalog types and price selection
//! - [`provisioning`]: polling state machine and clock
//! - [`config`]: control-plane configuration
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: error types

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod pricing;
pub mod provisioning;

// Re-export commonly used types
pub use config::{ControlPlaneConfig, DriverConfig, PollConfig};

pub use controlplane::{
    ApiServer, ApiServerConfig, BackendFactory, Dispatcher, DriverRegistry, Operation,
    OperationOutcome, RestRouter,
};

pub use domain::ports::{
    Disk, DiskSpec, Labels, OsFormat, ResourceHandle, StorageOps, StorageOpsRef, StorageTier,
    VolumeStats,
};

pub use error::{Error, ErrorKind, Result};

pub use metrics::Metrics;

pub use pricing::{select_prices, PriceSelection};

pub use provisioning::{Clock, DelayPolicy, Observation, StateChangeConf, TokioClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
