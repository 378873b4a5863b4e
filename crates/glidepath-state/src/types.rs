//! Domain types for the Glidepath state store.
//!
//! These types represent the persisted state of rollouts, revisions, and
//! traffic routing. All types are serializable to/from JSON for storage
//! in redb tables. Timestamps are unix epoch milliseconds.

use serde::{Deserialize, Serialize};

pub use glide_core::{Generation, PodTemplate, Step, StrategySpec, WorkloadId};

// ── Rollout ───────────────────────────────────────────────────────

/// Where a rollout is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// Created, not yet started.
    Initializing,
    /// Waiting on a health verdict to execute the current step.
    StepInProgress,
    /// Holding on a pause step, an operator pause, or awaiting promotion.
    Paused,
    /// All steps done; the full cut-over is being applied.
    Promoting,
    /// New revision serves all traffic.
    Complete,
    /// Aborted; the stable revision serves all traffic.
    RolledBack,
}

impl RolloutPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RolloutPhase::Complete | RolloutPhase::RolledBack)
    }

    /// Whether the rollout still owns its workload's traffic.
    pub fn is_in_progress(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RolloutPhase::Initializing => "Initializing",
            RolloutPhase::StepInProgress => "StepInProgress",
            RolloutPhase::Paused => "Paused",
            RolloutPhase::Promoting => "Promoting",
            RolloutPhase::Complete => "Complete",
            RolloutPhase::RolledBack => "RolledBack",
        };
        f.write_str(label)
    }
}

/// Why a rollout is in `Paused`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// A canary `pause` step.
    Step,
    /// Blue-green preview is healthy and waits for a resume.
    AwaitingPromotion,
    /// Blue-green auto-promotion countdown.
    AutoPromotionDelay,
}

/// An active pause. `deadline_ms == None` means it only ends on resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseCondition {
    pub reason: PauseReason,
    pub started_at_ms: u64,
    pub deadline_ms: Option<u64>,
    /// Set by an explicit resume; the next advance moves on.
    pub cleared: bool,
}

impl PauseCondition {
    /// Whether the pause is over at `now_ms`.
    pub fn is_done(&self, now_ms: u64) -> bool {
        self.cleared || self.deadline_ms.is_some_and(|d| now_ms >= d)
    }
}

/// Persisted state of a single rollout. Only the strategy engine
/// mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub workload_id: WorkloadId,
    pub strategy: StrategySpec,
    pub phase: RolloutPhase,
    /// Index into the canary step list. Blue-green uses 0.
    pub current_step_index: u32,
    /// Generation being rolled out.
    pub current_revision: Generation,
    /// How many earlier rollouts of the same generation were started.
    /// A retry after a rollback gets the next attempt.
    #[serde(default)]
    pub attempt: u32,
    /// Generation serving traffic before this rollout. `None` on first deploy.
    pub stable_revision: Option<Generation>,
    /// Operator pause flag.
    pub paused: bool,
    pub pause: Option<PauseCondition>,
    /// Abort reason or last notable event.
    pub message: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl RolloutState {
    /// A fresh rollout at step 0.
    pub fn new(
        workload_id: &str,
        strategy: StrategySpec,
        current_revision: Generation,
        stable_revision: Option<Generation>,
        now_ms: u64,
    ) -> Self {
        Self {
            workload_id: workload_id.to_string(),
            strategy,
            phase: RolloutPhase::Initializing,
            current_step_index: 0,
            current_revision,
            attempt: 0,
            stable_revision,
            paused: false,
            pause: None,
            message: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Canary steps, empty for blue-green.
    pub fn steps(&self) -> &[Step] {
        match &self.strategy {
            StrategySpec::Canary(c) => &c.steps,
            StrategySpec::BlueGreen(_) => &[],
        }
    }

    /// Build the composite key for the history table.
    pub fn history_key(&self) -> String {
        crate::tables::attempt_key(&self.workload_id, self.current_revision, self.attempt)
    }
}

// ── Revision ──────────────────────────────────────────────────────

/// Immutable snapshot of a workload template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub workload_id: WorkloadId,
    pub generation: Generation,
    pub template_hash: String,
    pub template: PodTemplate,
    pub created_at_ms: u64,
}

impl Revision {
    /// Build the composite key for the revisions table.
    pub fn table_key(&self) -> String {
        crate::tables::generation_key(&self.workload_id, self.generation)
    }
}

// ── Traffic ───────────────────────────────────────────────────────

/// Weighted split between the stable and the canary revision.
///
/// Only the canary weight is stored; the stable weight is its
/// complement, so the two always sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    pub stable: Option<Generation>,
    pub canary: Option<Generation>,
    canary_weight: u8,
}

impl TrafficSplit {
    /// All traffic on `stable`.
    pub fn all_stable(stable: Option<Generation>) -> Self {
        Self {
            stable,
            canary: None,
            canary_weight: 0,
        }
    }

    /// A split with `canary_weight` percent on `canary`. Weights above
    /// 100 are clamped.
    pub fn new(stable: Option<Generation>, canary: Option<Generation>, canary_weight: u8) -> Self {
        Self {
            stable,
            canary,
            canary_weight: canary_weight.min(100),
        }
    }

    pub fn canary_weight(&self) -> u8 {
        self.canary_weight
    }

    pub fn stable_weight(&self) -> u8 {
        100 - self.canary_weight
    }
}

/// Blue-green service selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceSelectors {
    pub active: Option<Generation>,
    pub preview: Option<Generation>,
}

/// How a workload's traffic is currently routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Routing {
    Weighted(TrafficSplit),
    Selector(ServiceSelectors),
}

/// Last applied routing for a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub workload_id: WorkloadId,
    pub routing: Routing,
    pub updated_at_ms: u64,
}

// ── Health ────────────────────────────────────────────────────────

/// Pass/fail judgment on a revision. Transient: produced by the health
/// evaluator, consumed by the strategy engine, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    Passing,
    Failing,
    Unknown,
}

/// Unix epoch milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_weights_sum_to_100() {
        for w in [0u8, 1, 20, 50, 99, 100, 180, 255] {
            let split = TrafficSplit::new(Some(1), Some(2), w);
            assert_eq!(
                split.canary_weight() as u16 + split.stable_weight() as u16,
                100
            );
        }
    }

    #[test]
    fn split_serde_preserves_weight() {
        let split = TrafficSplit::new(Some(1), Some(2), 40);
        let json = serde_json::to_string(&Routing::Weighted(split)).unwrap();
        assert!(json.contains("\"mode\":\"weighted\""));
        let back: Routing = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Routing::Weighted(split));
    }

    #[test]
    fn pause_condition_done() {
        let timed = PauseCondition {
            reason: PauseReason::Step,
            started_at_ms: 1_000,
            deadline_ms: Some(11_000),
            cleared: false,
        };
        assert!(!timed.is_done(10_999));
        assert!(timed.is_done(11_000));

        let mut indefinite = PauseCondition {
            deadline_ms: None,
            ..timed.clone()
        };
        assert!(!indefinite.is_done(u64::MAX));
        indefinite.cleared = true;
        assert!(indefinite.is_done(0));
    }

    #[test]
    fn terminal_phases() {
        assert!(RolloutPhase::Complete.is_terminal());
        assert!(RolloutPhase::RolledBack.is_terminal());
        assert!(RolloutPhase::Paused.is_in_progress());
        assert!(RolloutPhase::Initializing.is_in_progress());
    }
}
