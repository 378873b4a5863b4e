//! Per-rollout worker task.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use glidepath_health::HealthEvaluator;
use glidepath_rollout::{Rollout, TrafficAction};
use glidepath_state::{Generation, HealthVerdict, RolloutState, StateStore};
use glidepath_traffic::{TrafficController, TrafficError};

use crate::apply::apply;
use crate::clock::Clock;

/// Operator requests. Every command is answered with the rollout state
/// after it was handled.
pub(crate) enum Command {
    Pause(oneshot::Sender<RolloutState>),
    Resume(oneshot::Sender<RolloutState>),
    Abort {
        reason: String,
        reply: oneshot::Sender<RolloutState>,
    },
    Supersede {
        generation: Generation,
        reply: oneshot::Sender<RolloutState>,
    },
}

/// Sole owner of one rollout's state while it is in progress.
pub(crate) struct Worker {
    rollout: Rollout,
    store: StateStore,
    traffic: TrafficController,
    health: HealthEvaluator,
    clock: Clock,
    tick: Duration,
    verdict: HealthVerdict,
}

impl Worker {
    pub(crate) fn new(
        rollout: Rollout,
        store: StateStore,
        traffic: TrafficController,
        health: HealthEvaluator,
        clock: Clock,
        tick: Duration,
    ) -> Self {
        Self {
            rollout,
            store,
            traffic,
            health,
            clock,
            tick,
            verdict: HealthVerdict::Unknown,
        }
    }

    /// Drive the rollout until it reaches a terminal phase, the command
    /// channel closes, or `shutdown` fires.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut verdicts: watch::Receiver<HealthVerdict>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let id = self.rollout.workload_id().to_string();
        let generation = self.rollout.generation();
        info!(rollout = %id, generation, phase = %self.rollout.phase(), "rollout worker started");

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut verdicts_open = true;

        let initial = *verdicts.borrow_and_update();
        self.observe(initial);
        self.step();

        while self.rollout.phase().is_in_progress() {
            let wakeup = self.rollout.next_wakeup().map(|ms| self.clock.instant_at(ms));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!(rollout = %id, "command channel closed");
                        break;
                    }
                },
                changed = verdicts.changed(), if verdicts_open => match changed {
                    Ok(()) => {
                        let verdict = *verdicts.borrow_and_update();
                        self.observe(verdict);
                        self.step();
                    }
                    // Evaluator gone; keep the last verdict.
                    Err(_) => verdicts_open = false,
                },
                _ = tokio::time::sleep_until(wakeup.unwrap_or_else(Instant::now)), if wakeup.is_some() => {
                    debug!(rollout = %id, "pause deadline reached");
                    self.step();
                }
                _ = ticker.tick() => self.step(),
                _ = shutdown.changed() => {
                    debug!(rollout = %id, "rollout worker shutting down");
                    break;
                }
            }
        }

        self.health.release(&id, &verdicts).await;
        info!(rollout = %id, generation, phase = %self.rollout.phase(), "rollout worker stopped");
    }

    fn handle(&mut self, command: Command) {
        let now = self.clock.now_ms();
        match command {
            Command::Pause(reply) => {
                let mut next = self.rollout.clone();
                if next.pause(now) {
                    self.commit(next, None);
                }
                let _ = reply.send(self.rollout.state().clone());
            }
            Command::Resume(reply) => {
                let mut next = self.rollout.clone();
                if next.resume(now) {
                    self.commit(next, None);
                    self.step();
                }
                let _ = reply.send(self.rollout.state().clone());
            }
            Command::Abort { reason, reply } => {
                let mut next = self.rollout.clone();
                let action = next.abort(&reason, now);
                self.commit(next, action);
                let _ = reply.send(self.rollout.state().clone());
            }
            Command::Supersede { generation, reply } => {
                let mut next = self.rollout.clone();
                let action = next.supersede(generation, now);
                self.commit(next, action);
                let _ = reply.send(self.rollout.state().clone());
            }
        }
    }

    /// Record a new verdict and mirror it into traffic readiness.
    fn observe(&mut self, verdict: HealthVerdict) {
        self.verdict = verdict;
        let id = self.rollout.workload_id();
        let generation = self.rollout.generation();
        let result = match verdict {
            HealthVerdict::Passing => self.traffic.mark_ready(id, generation),
            HealthVerdict::Failing => self.traffic.mark_unready(id, generation),
            HealthVerdict::Unknown => Ok(()),
        };
        if let Err(e) = result {
            warn!(rollout = %id, generation, error = %e, "failed to update readiness");
        }
    }

    /// Ask the engine for the next directive and carry it out.
    fn step(&mut self) {
        if self.rollout.phase().is_terminal() {
            return;
        }
        let mut next = self.rollout.clone();
        let action = next.advance(self.verdict, self.clock.now_ms());
        self.commit(next, action);
    }

    /// Apply `action`, then adopt and persist `next`.
    ///
    /// If a forward traffic change is refused the engine state is not
    /// adopted, so the same step is retried on the next wakeup. A failed
    /// rollback is logged and the rollout still ends rolled back.
    fn commit(&mut self, mut next: Rollout, action: Option<TrafficAction>) {
        let id = self.rollout.workload_id().to_string();
        let generation = next.generation();

        if let Some(action) = action {
            match apply(&self.traffic, &id, action) {
                Ok(()) => match action {
                    TrafficAction::Promote { .. } => {
                        if let Err(e) = next.confirm_promotion(self.clock.now_ms()) {
                            error!(rollout = %id, error = %e, "promotion applied but not confirmed");
                        }
                    }
                    TrafficAction::Rollback { .. } => {
                        let _ = self.traffic.mark_unready(&id, generation);
                    }
                    _ => {}
                },
                Err(TrafficError::NotReady { .. })
                    if !matches!(action, TrafficAction::Rollback { .. }) =>
                {
                    debug!(rollout = %id, generation, ?action, "revision not ready, holding step");
                    return;
                }
                Err(e) if !matches!(action, TrafficAction::Rollback { .. }) => {
                    warn!(rollout = %id, ?action, error = %e, "traffic change failed, holding step");
                    return;
                }
                Err(e) => {
                    error!(rollout = %id, error = %e, "rollback traffic change failed");
                }
            }
        }

        if next == self.rollout {
            return;
        }
        if let Err(e) = self.store.put_rollout(next.state()) {
            error!(rollout = %id, error = %e, "failed to persist rollout state");
        }
        self.rollout = next;
    }
}
