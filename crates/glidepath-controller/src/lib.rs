//! glidepath-controller: runs rollouts.
//!
//! One worker task per rollout owns its state. Operator commands reach
//! the worker over an `mpsc` channel with a `oneshot` reply, health
//! verdicts over the evaluator's `watch` channel, and bounded pauses are
//! a `sleep_until` inside the worker's `select!`. Each loop iteration
//! asks the strategy engine what to do, applies the resulting traffic
//! change, and persists the new state.
//!
//! ```text
//! submit ──▶ record revision ──▶ supersede old worker ──▶ begin rollout
//!                                                           │
//!                 commands (mpsc) ──▶ worker ◀── verdicts (watch)
//!                                       │
//!                       engine ──▶ traffic ──▶ state store
//! ```

pub mod apply;
pub mod clock;
pub mod controller;
pub mod error;
mod worker;

pub use clock::Clock;
pub use controller::RolloutController;
pub use error::{ControllerError, ControllerResult};
