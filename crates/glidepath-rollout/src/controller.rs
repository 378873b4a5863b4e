//! Rollout state machine.
//!
//! ```text
//! Initializing ─start─▶ StepInProgress ◀──▶ Paused
//!                             │                │
//!                             ▼                ▼
//!                          Promoting ─confirm─▶ Complete
//!
//! any non-terminal ─abort─▶ RolledBack
//! ```
//!
//! Every operation takes `now_ms` from the caller and returns the
//! traffic change to apply. Terminal rollouts ignore everything.

use thiserror::Error;
use tracing::{debug, info, warn};

use glidepath_state::{
    Generation, HealthVerdict, PauseCondition, PauseReason, RolloutPhase, RolloutState,
    Routing, ServiceSelectors, Step, StrategySpec, TrafficSplit,
};

/// Traffic change requested by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficAction {
    /// Canary: route `percent` of requests to `canary`.
    SetWeight { canary: Generation, percent: u8 },
    /// Blue-green: point the preview service at `preview`.
    SetPreview { preview: Generation },
    /// Cut all traffic over to `revision` and clear the previous one.
    Promote { revision: Generation },
    /// Restore all traffic to `stable`.
    Rollback { stable: Option<Generation> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{workload}: cannot {operation} while {phase}")]
    InvalidTransition {
        workload: String,
        operation: &'static str,
        phase: RolloutPhase,
    },
}

/// A rollout and its state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollout {
    state: RolloutState,
}

impl Rollout {
    /// Create a rollout of `current` replacing `stable`.
    pub fn new(
        workload_id: &str,
        strategy: StrategySpec,
        current: Generation,
        stable: Option<Generation>,
        now_ms: u64,
    ) -> Self {
        Self {
            state: RolloutState::new(workload_id, strategy, current, stable, now_ms),
        }
    }

    /// Rehydrate from persisted state.
    pub fn from_state(state: RolloutState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    pub fn into_state(self) -> RolloutState {
        self.state
    }

    pub fn workload_id(&self) -> &str {
        &self.state.workload_id
    }

    pub fn phase(&self) -> RolloutPhase {
        self.state.phase
    }

    pub fn generation(&self) -> Generation {
        self.state.current_revision
    }

    /// Start the rollout.
    ///
    /// A first deploy (no stable revision) has nothing to shift traffic
    /// away from and goes straight to promotion.
    pub fn start(&mut self, now_ms: u64) -> Option<TrafficAction> {
        if self.state.phase != RolloutPhase::Initializing {
            return None;
        }
        self.touch(now_ms);

        if self.state.stable_revision.is_none() {
            self.state.phase = RolloutPhase::Promoting;
            info!(
                rollout = %self.state.workload_id,
                generation = self.state.current_revision,
                "initial deploy, promoting directly"
            );
            return None;
        }

        self.state.phase = RolloutPhase::StepInProgress;
        let current = self.state.current_revision;
        match &self.state.strategy {
            StrategySpec::Canary(canary) => {
                info!(
                    rollout = %self.state.workload_id,
                    generation = current,
                    steps = canary.steps.len(),
                    "started canary rollout"
                );
                Some(TrafficAction::SetWeight {
                    canary: current,
                    percent: 0,
                })
            }
            StrategySpec::BlueGreen(bg) => {
                info!(
                    rollout = %self.state.workload_id,
                    generation = current,
                    active = %bg.active_service,
                    "started blue-green rollout"
                );
                Some(TrafficAction::SetPreview { preview: current })
            }
        }
    }

    /// Advance the rollout given the latest health verdict.
    ///
    /// A failing verdict aborts any in-progress rollout. Otherwise at
    /// most one step directive is executed per call, in order.
    pub fn advance(&mut self, verdict: HealthVerdict, now_ms: u64) -> Option<TrafficAction> {
        let phase = self.state.phase;
        if phase.is_terminal() || phase == RolloutPhase::Initializing {
            return None;
        }

        if verdict == HealthVerdict::Failing {
            let reason = format!(
                "health check failed for generation {}",
                self.state.current_revision
            );
            return self.abort(&reason, now_ms);
        }

        if self.state.paused {
            return None;
        }

        match phase {
            RolloutPhase::Paused => {
                let done = self
                    .state
                    .pause
                    .as_ref()
                    .is_none_or(|p| p.is_done(now_ms));
                if !done {
                    return None;
                }
                self.leave_pause(now_ms);
                self.execute(verdict, now_ms)
            }
            _ => self.execute(verdict, now_ms),
        }
    }

    /// Execute the directive at the current position.
    fn execute(&mut self, verdict: HealthVerdict, now_ms: u64) -> Option<TrafficAction> {
        match self.state.phase {
            RolloutPhase::Promoting => {
                self.touch(now_ms);
                debug!(rollout = %self.state.workload_id, "requesting promotion");
                Some(TrafficAction::Promote {
                    revision: self.state.current_revision,
                })
            }
            RolloutPhase::StepInProgress => {
                if verdict != HealthVerdict::Passing {
                    return None;
                }
                match &self.state.strategy {
                    StrategySpec::Canary(_) => self.execute_canary_step(now_ms),
                    StrategySpec::BlueGreen(_) => self.preview_ready(now_ms),
                }
            }
            _ => None,
        }
    }

    fn execute_canary_step(&mut self, now_ms: u64) -> Option<TrafficAction> {
        let index = self.state.current_step_index as usize;
        let Some(step) = self.state.steps().get(index).copied() else {
            self.state.phase = RolloutPhase::Promoting;
            self.touch(now_ms);
            info!(rollout = %self.state.workload_id, "all steps complete, promoting");
            return self.execute(HealthVerdict::Passing, now_ms);
        };
        self.touch(now_ms);

        match step {
            Step::SetWeight(percent) => {
                self.state.current_step_index += 1;
                if self.state.current_step_index as usize >= self.state.steps().len() {
                    self.state.phase = RolloutPhase::Promoting;
                }
                info!(
                    rollout = %self.state.workload_id,
                    step = index,
                    weight = percent,
                    "canary weight set"
                );
                Some(TrafficAction::SetWeight {
                    canary: self.state.current_revision,
                    percent,
                })
            }
            Step::Pause { duration_secs } => {
                self.enter_pause(
                    PauseReason::Step,
                    duration_secs.map(|s| now_ms.saturating_add(s.saturating_mul(1000))),
                    now_ms,
                );
                info!(
                    rollout = %self.state.workload_id,
                    step = index,
                    duration_secs = ?duration_secs,
                    "canary paused"
                );
                None
            }
        }
    }

    fn preview_ready(&mut self, now_ms: u64) -> Option<TrafficAction> {
        let StrategySpec::BlueGreen(bg) = &self.state.strategy else {
            return None;
        };
        if !bg.auto_promotion_enabled {
            info!(rollout = %self.state.workload_id, "preview healthy, awaiting promotion");
            self.enter_pause(PauseReason::AwaitingPromotion, None, now_ms);
            return None;
        }
        if bg.auto_promotion_seconds > 0 {
            let deadline = now_ms.saturating_add(bg.auto_promotion_seconds.saturating_mul(1000));
            self.enter_pause(PauseReason::AutoPromotionDelay, Some(deadline), now_ms);
            return None;
        }
        self.state.phase = RolloutPhase::Promoting;
        self.execute(HealthVerdict::Passing, now_ms)
    }

    fn enter_pause(&mut self, reason: PauseReason, deadline_ms: Option<u64>, now_ms: u64) {
        self.state.phase = RolloutPhase::Paused;
        self.state.pause = Some(PauseCondition {
            reason,
            started_at_ms: now_ms,
            deadline_ms,
            cleared: false,
        });
        self.touch(now_ms);
    }

    /// Move past the pause that just ended.
    fn leave_pause(&mut self, now_ms: u64) {
        let reason = self.state.pause.take().map(|p| p.reason);
        match reason {
            Some(PauseReason::Step) => {
                self.state.current_step_index += 1;
                self.state.phase =
                    if self.state.current_step_index as usize >= self.state.steps().len() {
                        RolloutPhase::Promoting
                    } else {
                        RolloutPhase::StepInProgress
                    };
            }
            Some(PauseReason::AwaitingPromotion | PauseReason::AutoPromotionDelay) => {
                self.state.phase = RolloutPhase::Promoting;
            }
            // Operator pause without a step pause underneath.
            None => self.state.phase = RolloutPhase::StepInProgress,
        }
        debug!(
            rollout = %self.state.workload_id,
            phase = %self.state.phase,
            step = self.state.current_step_index,
            "pause ended"
        );
        self.touch(now_ms);
    }

    /// Mark the promotion applied. Called once the traffic controller
    /// has moved all traffic to the new revision.
    pub fn confirm_promotion(&mut self, now_ms: u64) -> Result<(), EngineError> {
        if self.state.phase != RolloutPhase::Promoting {
            return Err(EngineError::InvalidTransition {
                workload: self.state.workload_id.clone(),
                operation: "confirm promotion",
                phase: self.state.phase,
            });
        }
        self.state.phase = RolloutPhase::Complete;
        self.state.pause = None;
        self.state.paused = false;
        self.touch(now_ms);
        info!(
            rollout = %self.state.workload_id,
            generation = self.state.current_revision,
            "rollout complete"
        );
        Ok(())
    }

    /// Abort the rollout and restore the stable revision.
    ///
    /// Idempotent: a terminal rollout returns `None` and is unchanged.
    pub fn abort(&mut self, reason: &str, now_ms: u64) -> Option<TrafficAction> {
        if self.state.phase.is_terminal() {
            return None;
        }
        warn!(
            rollout = %self.state.workload_id,
            generation = self.state.current_revision,
            %reason,
            "rolling back"
        );
        self.state.phase = RolloutPhase::RolledBack;
        self.state.pause = None;
        self.state.paused = false;
        self.state.message = Some(reason.to_string());
        self.touch(now_ms);
        Some(TrafficAction::Rollback {
            stable: self.state.stable_revision,
        })
    }

    /// Abort because `new_generation` replaced this rollout's revision.
    pub fn supersede(&mut self, new_generation: Generation, now_ms: u64) -> Option<TrafficAction> {
        self.abort(&format!("superseded by generation {new_generation}"), now_ms)
    }

    /// Operator pause. Returns whether anything changed.
    pub fn pause(&mut self, now_ms: u64) -> bool {
        if self.state.phase.is_terminal() || self.state.paused {
            return false;
        }
        self.state.paused = true;
        if self.state.phase == RolloutPhase::StepInProgress {
            self.state.phase = RolloutPhase::Paused;
        }
        self.touch(now_ms);
        info!(rollout = %self.state.workload_id, "rollout paused by operator");
        true
    }

    /// Explicit resume: clears the operator pause and any pause condition
    /// (indefinite step pause, bounded step pause, awaiting promotion).
    /// The next `advance` moves on. Returns whether anything changed.
    pub fn resume(&mut self, now_ms: u64) -> bool {
        if self.state.phase.is_terminal() {
            return false;
        }
        let mut changed = std::mem::take(&mut self.state.paused);
        if let Some(pause) = self.state.pause.as_mut() {
            if !pause.cleared {
                pause.cleared = true;
                changed = true;
            }
        }
        if changed {
            self.touch(now_ms);
            info!(rollout = %self.state.workload_id, phase = %self.state.phase, "rollout resumed");
        }
        changed
    }

    /// When a bounded pause ends, if one is running.
    pub fn next_wakeup(&self) -> Option<u64> {
        if self.state.phase != RolloutPhase::Paused || self.state.paused {
            return None;
        }
        self.state.pause.as_ref().and_then(|p| p.deadline_ms)
    }

    /// Canary weight implied by the steps executed so far.
    pub fn current_weight(&self) -> u8 {
        match self.state.phase {
            RolloutPhase::Complete => 100,
            RolloutPhase::RolledBack | RolloutPhase::Initializing => 0,
            _ => {
                let executed = (self.state.current_step_index as usize).min(self.state.steps().len());
                self.state.steps()[..executed]
                    .iter()
                    .rev()
                    .find_map(|s| match s {
                        Step::SetWeight(w) => Some(*w),
                        Step::Pause { .. } => None,
                    })
                    .unwrap_or(0)
            }
        }
    }

    /// Routing this rollout wants in place right now. Used to restore
    /// traffic after a restart.
    pub fn desired_routing(&self) -> Routing {
        let current = Some(self.state.current_revision);
        let stable = self.state.stable_revision;
        let phase = self.state.phase;
        match &self.state.strategy {
            StrategySpec::Canary(_) => Routing::Weighted(match phase {
                RolloutPhase::Complete => TrafficSplit::all_stable(current),
                RolloutPhase::RolledBack | RolloutPhase::Initializing => {
                    TrafficSplit::all_stable(stable)
                }
                _ => TrafficSplit::new(stable, current, self.current_weight()),
            }),
            StrategySpec::BlueGreen(_) => Routing::Selector(match phase {
                RolloutPhase::Complete => ServiceSelectors {
                    active: current,
                    preview: None,
                },
                RolloutPhase::RolledBack | RolloutPhase::Initializing => ServiceSelectors {
                    active: stable,
                    preview: None,
                },
                _ => ServiceSelectors {
                    active: stable,
                    preview: current,
                },
            }),
        }
    }

    fn touch(&mut self, now_ms: u64) {
        self.state.updated_at_ms = now_ms;
    }
}
