//! Control Plane Module
//!
//! Driver registry, request dispatch, the storage backends and the API
//! that fronts them.

pub mod api;
pub mod backends;
pub mod dispatcher;
pub mod registry;

pub use api::*;
pub use backends::*;
pub use dispatcher::*;
pub use registry::*;
