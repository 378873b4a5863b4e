//! Glidepath strategy engine: canary steps, blue-green promotion, rollback.
//!
//! This crate is the pure state machine behind every rollout. It never
//! touches the network or the clock: callers pass the current time and
//! the latest health verdict, and the engine answers with the traffic
//! change to apply, if any.
//!
//! # Components
//!
//! - **`controller`** - Rollout state machine (start, advance, pause, resume, abort)
//! - **`strategy`** - Step plans: the splits a strategy walks through

pub mod controller;
pub mod strategy;

pub use controller::{EngineError, Rollout, TrafficAction};
pub use strategy::{PlannedStep, plan};
