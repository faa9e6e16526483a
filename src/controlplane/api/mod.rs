//! API Module
//!
//! REST surface over the request dispatcher.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
