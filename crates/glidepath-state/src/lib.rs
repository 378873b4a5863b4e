//! glidepath-state: durable record of rollouts, revisions, and traffic.
//!
//! Backed by [redb](https://docs.rs/redb). This is the leaf of the
//! controller: the strategy engine reads and writes `RolloutState`, the
//! traffic controller records every applied split, and revisions are
//! minted here with monotonically increasing generations.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{workload}:{generation}`) enable
//! prefix scans for a workload's history.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
