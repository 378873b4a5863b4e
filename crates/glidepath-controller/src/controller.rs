//! Rollout controller: submission, operator commands and recovery.
//!
//! `RolloutController` is the entry point the API and the daemon share.
//! It mints revisions, supersedes whatever rollout currently owns a
//! workload, wires up health evaluation and spawns one worker per
//! rollout. Reads go straight to the state store, which every worker
//! keeps current.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use glide_core::{GlideConfig, PodTemplate, ProbeAction, ProbeSpec, RolloutSpec, parse_rollouts};
use glidepath_health::HealthEvaluator;
use glidepath_rollout::Rollout;
use glidepath_state::{
    Generation, HealthVerdict, Revision, RolloutPhase, RolloutState, Routing, StateStore,
};
use glidepath_traffic::TrafficController;

use crate::apply::{apply, initial_routing};
use crate::clock::Clock;
use crate::error::{ControllerError, ControllerResult};
use crate::worker::{Command, Worker};

const COMMAND_BUFFER: usize = 16;

/// Runs every rollout in the process.
#[derive(Clone)]
pub struct RolloutController {
    store: StateStore,
    traffic: TrafficController,
    health: HealthEvaluator,
    clock: Clock,
    config: Arc<GlideConfig>,
    workers: Arc<Mutex<HashMap<String, mpsc::Sender<Command>>>>,
    /// Serializes submissions so revision minting and superseding
    /// happen as one step per workload.
    submit_lock: Arc<Mutex<()>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RolloutController {
    pub fn new(
        store: StateStore,
        traffic: TrafficController,
        health: HealthEvaluator,
        config: GlideConfig,
    ) -> Self {
        Self::with_clock(store, traffic, health, config, Clock::new())
    }

    pub fn with_clock(
        store: StateStore,
        traffic: TrafficController,
        health: HealthEvaluator,
        config: GlideConfig,
        clock: Clock,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            traffic,
            health,
            clock,
            config: Arc::new(config),
            workers: Arc::new(Mutex::new(HashMap::new())),
            submit_lock: Arc::new(Mutex::new(())),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn traffic_controller(&self) -> &TrafficController {
        &self.traffic
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Submit a parsed Rollout.
    ///
    /// An unchanged template is a no-op that returns the current rollout,
    /// unless that rollout was rolled back, in which case it is retried.
    /// A changed template mints a new generation and supersedes any
    /// rollout still in progress for the workload.
    pub async fn submit(&self, spec: RolloutSpec) -> ControllerResult<RolloutState> {
        let _guard = self.submit_lock.lock().await;
        let id = spec.workload_id();
        let now = self.clock.now_ms();

        let (revision, created) = self.store.record_revision(&id, &spec.template, now)?;
        let generation = revision.generation;

        let mut stable = None;
        if let Some(existing) = self.store.get_rollout(&id)? {
            if existing.current_revision == generation && existing.phase != RolloutPhase::RolledBack
            {
                debug!(rollout = %id, generation, phase = %existing.phase, "template unchanged");
                return Ok(existing);
            }
            stable = match existing.phase {
                RolloutPhase::Complete => Some(existing.current_revision),
                RolloutPhase::RolledBack => existing.stable_revision,
                _ => {
                    let superseded = self.supersede(existing, generation).await?;
                    superseded.stable_revision
                }
            };
        }

        let fresh = Rollout::new(&id, spec.strategy.clone(), generation, stable, now);
        let mut rollout = Rollout::from_state(self.store.begin_rollout(fresh.state())?);
        self.traffic
            .register(&id, initial_routing(&spec.strategy, stable))?;
        if let Some(action) = rollout.start(now) {
            apply(&self.traffic, &id, action)?;
        }
        self.store.put_rollout(rollout.state())?;

        let verdicts = self
            .watch_health(&spec.namespace, &spec.name, &id, generation, &spec.template)
            .await;
        self.spawn_worker(rollout.clone(), verdicts).await;

        info!(
            rollout = %id,
            generation,
            stable = ?stable,
            strategy = spec.strategy.label(),
            new_revision = created,
            "rollout submitted"
        );
        Ok(rollout.into_state())
    }

    /// Parse a multi-document YAML stream and submit every Rollout in it.
    pub async fn submit_documents(&self, input: &str) -> ControllerResult<Vec<RolloutState>> {
        let specs = parse_rollouts(input)?;
        let mut states = Vec::with_capacity(specs.len());
        for spec in specs {
            states.push(self.submit(spec).await?);
        }
        Ok(states)
    }

    /// Clear an operator pause or a pause condition.
    pub async fn resume(&self, id: &str) -> ControllerResult<RolloutState> {
        self.command(id, Command::Resume).await
    }

    pub async fn pause(&self, id: &str) -> ControllerResult<RolloutState> {
        self.command(id, Command::Pause).await
    }

    /// Abort and restore the stable revision. A finished rollout is
    /// returned unchanged.
    pub async fn abort(&self, id: &str, reason: &str) -> ControllerResult<RolloutState> {
        let reason = reason.to_string();
        self.command(id, |reply| Command::Abort { reason, reply })
            .await
    }

    pub fn status(&self, id: &str) -> ControllerResult<RolloutState> {
        self.store
            .get_rollout(id)?
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> ControllerResult<Vec<RolloutState>> {
        Ok(self.store.list_rollouts()?)
    }

    /// Every rollout the workload has had, oldest first.
    pub fn history(&self, id: &str) -> ControllerResult<Vec<RolloutState>> {
        let history = self.store.rollout_history(id)?;
        if history.is_empty() {
            return Err(ControllerError::NotFound(id.to_string()));
        }
        Ok(history)
    }

    pub fn revisions(&self, id: &str) -> ControllerResult<Vec<Revision>> {
        let revisions = self.store.list_revisions(id)?;
        if revisions.is_empty() {
            return Err(ControllerError::NotFound(id.to_string()));
        }
        Ok(revisions)
    }

    /// Live routing for a workload, falling back to the last stored record.
    pub fn traffic(&self, id: &str) -> ControllerResult<Routing> {
        if let Some(routing) = self.traffic.snapshot(id) {
            return Ok(routing);
        }
        self.store
            .get_traffic(id)?
            .map(|record| record.routing)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    /// Resume every rollout that was in progress when the process stopped.
    ///
    /// Call after `TrafficController::restore`. Workloads without a stored
    /// routing table get the one their rollout implies.
    pub async fn recover(&self) -> ControllerResult<usize> {
        let _guard = self.submit_lock.lock().await;
        let pending = self.store.list_in_progress()?;
        let mut resumed = 0;

        for state in pending {
            let id = state.workload_id.clone();
            let mut rollout = Rollout::from_state(state);
            let generation = rollout.generation();

            let Some(revision) = self.store.get_revision(&id, generation)? else {
                warn!(rollout = %id, generation, "revision missing, cannot resume rollout");
                continue;
            };

            if self.traffic.snapshot(&id).is_none() {
                self.traffic.register(&id, rollout.desired_routing())?;
            }
            if rollout.phase() == RolloutPhase::Initializing {
                let now = self.clock.now_ms();
                if let Some(action) = rollout.start(now) {
                    apply(&self.traffic, &id, action)?;
                }
                self.store.put_rollout(rollout.state())?;
            }

            let (namespace, name) = id.split_once('/').unwrap_or(("default", id.as_str()));
            let verdicts = self
                .watch_health(namespace, name, &id, generation, &revision.template)
                .await;
            self.spawn_worker(rollout, verdicts).await;
            resumed += 1;
        }

        info!(resumed, "rollouts recovered");
        Ok(resumed)
    }

    /// Workloads with a live worker.
    pub async fn active(&self) -> Vec<String> {
        let workers = self.workers.lock().await;
        let mut ids: Vec<String> = workers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop every worker and probe loop. Rollout state stays in the
    /// store for `recover`.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.workers.lock().await.clear();
        self.health.stop_all().await;
        info!("rollout controller stopped");
    }

    /// Abort the in-progress rollout `existing` in favour of `generation`.
    async fn supersede(
        &self,
        existing: RolloutState,
        generation: Generation,
    ) -> ControllerResult<RolloutState> {
        let id = existing.workload_id.clone();
        match self
            .send(&id, |reply| Command::Supersede { generation, reply })
            .await
        {
            Ok(state) => Ok(state),
            Err(ControllerError::NotFound(_) | ControllerError::Closed(_)) => {
                // No live worker: finish it here.
                let mut rollout = Rollout::from_state(existing);
                if let Some(action) = rollout.supersede(generation, self.clock.now_ms()) {
                    if let Err(e) = apply(&self.traffic, &id, action) {
                        warn!(rollout = %id, error = %e, "rollback of superseded rollout failed");
                    }
                }
                self.store.put_rollout(rollout.state())?;
                Ok(rollout.into_state())
            }
            Err(e) => Err(e),
        }
    }

    /// Start health evaluation for a revision.
    ///
    /// Uses the template's gating probe, else a TCP probe on its first
    /// port. A template with neither is treated as healthy.
    async fn watch_health(
        &self,
        namespace: &str,
        name: &str,
        id: &str,
        generation: Generation,
        template: &PodTemplate,
    ) -> watch::Receiver<HealthVerdict> {
        let probe = template.gating_probe().cloned().or_else(|| {
            template.primary_port().map(|port| {
                let mut probe = ProbeSpec::new(ProbeAction::TcpSocket { port });
                probe.period_seconds = self.config.default_health_period().as_secs().max(1) as u32;
                probe
            })
        });

        match probe {
            Some(probe) => {
                let host = self.config.canary_host(namespace, name);
                self.health.start(id, generation, &probe, &host).await
            }
            None => {
                debug!(rollout = %id, generation, "no probe or port, assuming healthy");
                let (_, rx) = watch::channel(HealthVerdict::Passing);
                rx
            }
        }
    }

    async fn spawn_worker(&self, rollout: Rollout, verdicts: watch::Receiver<HealthVerdict>) {
        let id = rollout.workload_id().to_string();
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = Worker::new(
            rollout,
            self.store.clone(),
            self.traffic.clone(),
            self.health.clone(),
            self.clock,
            self.config.tick_interval(),
        );
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(worker.run(rx, verdicts, shutdown));
        self.workers.lock().await.insert(id, tx);
    }

    /// Send a command to a live worker.
    async fn send(
        &self,
        id: &str,
        make: impl FnOnce(oneshot::Sender<RolloutState>) -> Command,
    ) -> ControllerResult<RolloutState> {
        let tx = self.workers.lock().await.get(id).cloned();
        let Some(tx) = tx else {
            return Err(ControllerError::NotFound(id.to_string()));
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(make(reply_tx))
            .await
            .map_err(|_| ControllerError::Closed(id.to_string()))?;
        reply_rx
            .await
            .map_err(|_| ControllerError::Closed(id.to_string()))
    }

    /// Operator command. A rollout without a live worker must already be
    /// finished; its stored state is the answer.
    async fn command(
        &self,
        id: &str,
        make: impl FnOnce(oneshot::Sender<RolloutState>) -> Command,
    ) -> ControllerResult<RolloutState> {
        match self.send(id, make).await {
            Err(ControllerError::NotFound(_) | ControllerError::Closed(_)) => {
                match self.store.get_rollout(id)? {
                    Some(state) if state.phase.is_terminal() => Ok(state),
                    Some(_) => Err(ControllerError::Closed(id.to_string())),
                    None => Err(ControllerError::NotFound(id.to_string())),
                }
            }
            other => other,
        }
    }
}
