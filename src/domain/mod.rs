//! Domain layer
//!
//! The storage-ops contract and the types that cross it.

pub mod ports;

pub use ports::*;
