//! Asynchronous provisioning support
//!
//! A clock abstraction and the polling state machine backends use to wait
//! for vendor-side work to settle.

pub mod clock;
pub mod state_machine;

pub use clock::{Clock, TokioClock};
pub use state_machine::{DelayPolicy, Observation, PollState, StateChangeConf};
