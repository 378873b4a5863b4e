//! redb table definitions for the Glidepath state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Generations in keys are zero-padded so lexical order is numeric order.

use redb::TableDefinition;

/// Current rollout per workload, keyed by `{namespace}/{name}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Every rollout ever started, keyed by `{workload}:{generation:020}:{attempt:010}`.
pub const ROLLOUT_HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("rollout_history");

/// Immutable revisions, keyed by `{workload}:{generation:020}`.
pub const REVISIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("revisions");

/// Last applied routing per workload, keyed by `{namespace}/{name}`.
pub const TRAFFIC: TableDefinition<&str, &[u8]> = TableDefinition::new("traffic");

/// Build a `{workload}:{generation}` key.
pub fn generation_key(workload_id: &str, generation: u64) -> String {
    format!("{workload_id}:{generation:020}")
}

/// Build a `{workload}:{generation}:{attempt}` key.
pub fn attempt_key(workload_id: &str, generation: u64, attempt: u32) -> String {
    format!("{workload_id}:{generation:020}:{attempt:010}")
}
