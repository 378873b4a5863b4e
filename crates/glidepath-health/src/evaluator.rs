//! Health evaluator: background probe loops for active rollouts.
//!
//! `HealthEvaluator` spawns one task per rollout that probes the new
//! revision at a fixed period and publishes the verdict on a `watch`
//! channel. Verdict flips are also reported through an optional callback.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use glide_core::ProbeSpec;
use glidepath_state::{Generation, HealthVerdict};

use crate::checker::{HealthTracker, ProbeResult, ProbeTarget, probe};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Invoked with `(rollout_id, generation, verdict)` whenever a verdict flips.
pub type VerdictCallback =
    Arc<dyn Fn(String, Generation, HealthVerdict) -> BoxFuture<()> + Send + Sync>;

/// Executes one probe. Swappable so tests can script results.
pub type ProbeFn = Arc<dyn Fn(ProbeTarget) -> BoxFuture<ProbeResult> + Send + Sync>;

struct MonitorSlot {
    generation: Generation,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    verdict_rx: watch::Receiver<HealthVerdict>,
}

/// Manages probe loops for all active rollouts.
#[derive(Clone)]
pub struct HealthEvaluator {
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
    on_verdict: Option<VerdictCallback>,
    prober: ProbeFn,
}

impl HealthEvaluator {
    pub fn new() -> Self {
        Self {
            monitors: Arc::new(RwLock::new(HashMap::new())),
            on_verdict: None,
            prober: Arc::new(|target: ProbeTarget| {
                Box::pin(async move { probe(&target).await }) as BoxFuture<ProbeResult>
            }),
        }
    }

    pub fn with_callback(mut self, callback: VerdictCallback) -> Self {
        self.on_verdict = Some(callback);
        self
    }

    pub fn with_prober(mut self, prober: ProbeFn) -> Self {
        self.prober = prober;
        self
    }

    /// Start probing `generation` of a rollout at `host`.
    ///
    /// Replaces any loop already running for the rollout. The returned
    /// receiver starts at `Unknown`.
    pub async fn start(
        &self,
        rollout_id: &str,
        generation: Generation,
        spec: &ProbeSpec,
        host: &str,
    ) -> watch::Receiver<HealthVerdict> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (verdict_tx, verdict_rx) = watch::channel(HealthVerdict::Unknown);

        let target = ProbeTarget::new(host, spec);
        let address = target.address();
        let tracker = HealthTracker::new(spec);
        let initial_delay = Duration::from_secs(u64::from(spec.initial_delay_seconds));
        let period = Duration::from_secs(u64::from(spec.period_seconds.max(1)));

        let ctx = LoopContext {
            rollout_id: rollout_id.to_string(),
            generation,
            target,
            prober: self.prober.clone(),
            callback: self.on_verdict.clone(),
        };
        let handle = tokio::spawn(async move {
            run_probe_loop(ctx, tracker, initial_delay, period, verdict_tx, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            rollout_id.to_string(),
            MonitorSlot {
                generation,
                handle,
                shutdown_tx,
                verdict_rx: verdict_rx.clone(),
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(rollout = %rollout_id, generation, %address, "health evaluation started");
        verdict_rx
    }

    /// Latest verdict channel for a rollout, if it is being evaluated.
    pub async fn subscribe(&self, rollout_id: &str) -> Option<watch::Receiver<HealthVerdict>> {
        let monitors = self.monitors.read().await;
        monitors.get(rollout_id).map(|s| s.verdict_rx.clone())
    }

    /// Current verdict for a rollout. `Unknown` when not evaluated.
    pub async fn verdict(&self, rollout_id: &str) -> HealthVerdict {
        let monitors = self.monitors.read().await;
        monitors
            .get(rollout_id)
            .map(|s| *s.verdict_rx.borrow())
            .unwrap_or(HealthVerdict::Unknown)
    }

    pub async fn stop(&self, rollout_id: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(rollout_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(rollout = %rollout_id, generation = slot.generation, "health evaluation stopped");
        }
    }

    /// Stop the loop feeding `receiver`, if it is still the current one
    /// for the rollout. A newer evaluation of the same rollout is left
    /// running.
    pub async fn release(&self, rollout_id: &str, receiver: &watch::Receiver<HealthVerdict>) {
        let mut monitors = self.monitors.write().await;
        let current = monitors
            .get(rollout_id)
            .is_some_and(|slot| slot.verdict_rx.same_channel(receiver));
        if !current {
            return;
        }
        if let Some(slot) = monitors.remove(rollout_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(rollout = %rollout_id, generation = slot.generation, "health evaluation released");
        }
    }

    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (id, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(rollout = %id, "health evaluation stopped");
        }
        info!("all health evaluations stopped");
    }

    pub async fn active(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        monitors.keys().cloned().collect()
    }

    pub async fn is_monitoring(&self, rollout_id: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(rollout_id)
    }
}

impl Default for HealthEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

struct LoopContext {
    rollout_id: String,
    generation: Generation,
    target: ProbeTarget,
    prober: ProbeFn,
    callback: Option<VerdictCallback>,
}

async fn run_probe_loop(
    ctx: LoopContext,
    mut tracker: HealthTracker,
    initial_delay: Duration,
    period: Duration,
    verdict_tx: watch::Sender<HealthVerdict>,
    mut shutdown: watch::Receiver<bool>,
) {
    let rollout_id = ctx.rollout_id.as_str();
    debug!(rollout = %rollout_id, ?initial_delay, ?period, "probe loop starting");

    tokio::select! {
        _ = tokio::time::sleep(initial_delay) => {}
        _ = shutdown.changed() => return,
    }

    loop {
        let result = (ctx.prober)(ctx.target.clone()).await;
        let previous = tracker.verdict();
        let verdict = tracker.record(result);

        if verdict != previous {
            info!(
                rollout = %rollout_id,
                generation = ctx.generation,
                ?previous,
                ?verdict,
                "health verdict changed"
            );
            if let Some(ref cb) = ctx.callback {
                cb(rollout_id.to_string(), ctx.generation, verdict).await;
            }
            let _ = verdict_tx.send(verdict);
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => {
                debug!(rollout = %rollout_id, "probe loop shutting down");
                break;
            }
        }
    }
}
