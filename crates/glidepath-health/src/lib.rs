//! glidepath-health: probe polling and pass/fail verdicts for rollouts.
//!
//! The evaluator runs one background task per active rollout. Each task
//! probes the new revision's endpoint with the pod template's readiness
//! probe and folds the results into a verdict with kubelet threshold
//! semantics.
//!
//! # Architecture
//!
//! ```text
//! HealthEvaluator
//!   ├── Per-rollout background task
//!   │   ├── HealthTracker (consecutive successes / failures)
//!   │   ├── http_probe() / tcp_probe() → ProbeResult
//!   │   └── watch::Sender<HealthVerdict>
//!   └── Optional VerdictCallback for the rollout controller
//! ```
//!
//! A verdict starts `Unknown`, becomes `Passing` after
//! `successThreshold` consecutive successes and `Failing` after
//! `failureThreshold` consecutive failures.

pub mod checker;
pub mod evaluator;

pub use checker::{HealthTracker, ProbeResult, ProbeTarget, http_probe, probe, tcp_probe};
pub use evaluator::{HealthEvaluator, ProbeFn, VerdictCallback};
