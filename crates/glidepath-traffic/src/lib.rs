//! Glidepath traffic controller: weighted canary splits and blue-green
//! selectors.
//!
//! The controller keeps one routing table per workload in memory and
//! records every applied change in the state store. Only the rollout
//! controller mutates it, on instruction from the strategy engine.
//!
//! # Components
//!
//! - **`controller`** - Routing table, readiness gating, request routing
//! - **`error`** - `TrafficError`

pub mod controller;
pub mod error;

pub use controller::TrafficController;
pub use error::{TrafficError, TrafficResult};
