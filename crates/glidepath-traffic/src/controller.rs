//! Traffic routing tables.
//!
//! Each workload has one entry holding its current `Routing` and the set
//! of revisions with ready endpoints. Mutations take the write lock for
//! the whole change, so `snapshot` and `route` never observe a partial
//! split. The state store write happens under the same lock, keeping the
//! persisted order identical to the applied order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use glidepath_state::{
    Generation, Routing, ServiceSelectors, StateStore, TrafficRecord, TrafficSplit, epoch_millis,
};

use crate::error::{TrafficError, TrafficResult};

struct WorkloadEntry {
    routing: Routing,
    ready: HashSet<Generation>,
    counter: AtomicU64,
}

/// Applies traffic changes and answers routing queries.
#[derive(Clone)]
pub struct TrafficController {
    store: StateStore,
    workloads: Arc<RwLock<HashMap<String, WorkloadEntry>>>,
}

impl TrafficController {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            workloads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Reload routing tables from the store after a restart.
    ///
    /// Readiness is not persisted; every revision that currently receives
    /// traffic is assumed ready until the health evaluator says otherwise.
    pub fn restore(&self) -> TrafficResult<usize> {
        let records = self.store.list_traffic()?;
        let mut workloads = self.workloads.write().expect("workloads lock");
        for record in &records {
            let ready = routed_generations(&record.routing).into_iter().collect();
            workloads.insert(
                record.workload_id.clone(),
                WorkloadEntry {
                    routing: record.routing,
                    ready,
                    counter: AtomicU64::new(0),
                },
            );
        }
        info!(count = records.len(), "restored traffic tables");
        Ok(records.len())
    }

    /// Install the initial routing for a workload, replacing any
    /// previous table. `stable` is marked ready.
    pub fn register(&self, workload: &str, routing: Routing) -> TrafficResult<()> {
        let mut workloads = self.workloads.write().expect("workloads lock");
        let ready = routed_generations(&routing).into_iter().collect();
        self.record(workload, routing)?;
        workloads.insert(
            workload.to_string(),
            WorkloadEntry {
                routing,
                ready,
                counter: AtomicU64::new(0),
            },
        );
        debug!(workload, ?routing, "registered traffic table");
        Ok(())
    }

    pub fn mark_ready(&self, workload: &str, generation: Generation) -> TrafficResult<()> {
        self.with_entry(workload, |entry| {
            entry.ready.insert(generation);
            Ok(())
        })
    }

    pub fn mark_unready(&self, workload: &str, generation: Generation) -> TrafficResult<()> {
        self.with_entry(workload, |entry| {
            if entry.ready.remove(&generation) {
                debug!(workload, generation, "revision marked unready");
            }
            Ok(())
        })
    }

    pub fn is_ready(&self, workload: &str, generation: Generation) -> bool {
        let workloads = self.workloads.read().expect("workloads lock");
        workloads
            .get(workload)
            .is_some_and(|e| e.ready.contains(&generation))
    }

    /// Send `percent` of the workload's requests to `canary`.
    ///
    /// The stable side keeps whatever revision it already serves. A
    /// non-zero weight requires the canary to be ready.
    pub fn set_weight(
        &self,
        workload: &str,
        canary: Generation,
        percent: u8,
    ) -> TrafficResult<TrafficSplit> {
        if percent > 100 {
            return Err(TrafficError::InvalidWeight(percent));
        }
        self.mutate(workload, |entry| {
            if percent > 0 && !entry.ready.contains(&canary) {
                return Err(not_ready(workload, canary));
            }
            let stable = match entry.routing {
                Routing::Weighted(split) => split.stable,
                Routing::Selector(sel) => sel.active,
            };
            let split = TrafficSplit::new(stable, Some(canary), percent);
            info!(workload, canary, weight = percent, "traffic weight set");
            Ok((Routing::Weighted(split), split))
        })
    }

    /// Blue-green cut-over: repoint the active service at `active`.
    ///
    /// The previous active revision stops receiving traffic and loses its
    /// readiness. The preview selector is dropped when it pointed at
    /// `active`. The previous selector stays live when the target is not
    /// ready.
    pub fn switch_selector(&self, workload: &str, active: Generation) -> TrafficResult<()> {
        self.mutate(workload, |entry| {
            let routing = select_active(workload, entry, active)?;
            info!(workload, active, "active selector switched");
            Ok((routing, ()))
        })
    }

    /// Point the preview service at `preview`. Active traffic is untouched.
    pub fn set_preview(&self, workload: &str, preview: Generation) -> TrafficResult<()> {
        self.mutate(workload, |entry| {
            let active = selector_active(&entry.routing);
            debug!(workload, preview, "preview selector set");
            Ok((
                Routing::Selector(ServiceSelectors {
                    active,
                    preview: Some(preview),
                }),
                (),
            ))
        })
    }

    /// Restore all traffic to `stable`, dropping the canary or preview.
    /// With no stable revision the current stable side is kept.
    pub fn rollback(&self, workload: &str, stable: Option<Generation>) -> TrafficResult<()> {
        self.mutate(workload, |entry| {
            let routing = match entry.routing {
                Routing::Weighted(split) => {
                    Routing::Weighted(TrafficSplit::all_stable(stable.or(split.stable)))
                }
                Routing::Selector(sel) => Routing::Selector(ServiceSelectors {
                    active: stable.or(sel.active),
                    preview: None,
                }),
            };
            warn!(workload, stable = ?stable, "traffic rolled back");
            Ok((routing, ()))
        })
    }

    /// Full cut-over to `revision`. It becomes the stable side and the
    /// previous revision stops receiving traffic. Selector routing is
    /// switched the same way as `switch_selector`.
    pub fn promote(&self, workload: &str, revision: Generation) -> TrafficResult<()> {
        self.mutate(workload, |entry| {
            if let Routing::Selector(_) = entry.routing {
                return Ok((select_active(workload, entry, revision)?, ()));
            }
            if !entry.ready.contains(&revision) {
                return Err(not_ready(workload, revision));
            }
            let previous = routed_generations(&entry.routing);
            entry.ready.retain(|g| *g == revision || !previous.contains(g));
            info!(workload, revision, "traffic promoted");
            Ok((Routing::Weighted(TrafficSplit::all_stable(Some(revision))), ()))
        })
    }

    /// Consistent read of a workload's routing.
    pub fn snapshot(&self, workload: &str) -> Option<Routing> {
        let workloads = self.workloads.read().expect("workloads lock");
        workloads.get(workload).map(|e| e.routing)
    }

    /// Revision that serves the next request.
    ///
    /// Weighted splits use a smooth deterministic round robin: out of
    /// every 100 consecutive requests exactly `canary_weight` go to the
    /// canary, spread evenly. Selectors always answer the active side.
    pub fn route(&self, workload: &str) -> Option<Generation> {
        let workloads = self.workloads.read().expect("workloads lock");
        let entry = workloads.get(workload)?;
        match entry.routing {
            Routing::Weighted(split) => {
                let n = entry.counter.fetch_add(1, Ordering::Relaxed) % 100;
                let w = split.canary_weight() as u64;
                let to_canary = ((n + 1) * w) / 100 > (n * w) / 100;
                if to_canary {
                    split.canary.or(split.stable)
                } else {
                    split.stable.or(split.canary)
                }
            }
            Routing::Selector(sel) => sel.active,
        }
    }

    /// Revision behind the preview service, if any.
    pub fn route_preview(&self, workload: &str) -> Option<Generation> {
        match self.snapshot(workload)? {
            Routing::Selector(sel) => sel.preview,
            Routing::Weighted(_) => None,
        }
    }

    fn with_entry<T>(
        &self,
        workload: &str,
        f: impl FnOnce(&mut WorkloadEntry) -> TrafficResult<T>,
    ) -> TrafficResult<T> {
        let mut workloads = self.workloads.write().expect("workloads lock");
        let entry = workloads
            .get_mut(workload)
            .ok_or_else(|| TrafficError::UnknownWorkload(workload.to_string()))?;
        f(entry)
    }

    /// Compute a new routing under the write lock, persist it, then
    /// install it. Nothing changes when either step fails.
    fn mutate<T>(
        &self,
        workload: &str,
        f: impl FnOnce(&mut WorkloadEntry) -> TrafficResult<(Routing, T)>,
    ) -> TrafficResult<T> {
        self.with_entry(workload, |entry| {
            let ready_before = entry.ready.clone();
            let (routing, out) = match f(entry) {
                Ok(v) => v,
                Err(e) => {
                    entry.ready = ready_before;
                    return Err(e);
                }
            };
            if let Err(e) = self.record(workload, routing) {
                entry.ready = ready_before;
                return Err(e);
            }
            entry.routing = routing;
            entry.counter.store(0, Ordering::Relaxed);
            Ok(out)
        })
    }

    fn record(&self, workload: &str, routing: Routing) -> TrafficResult<()> {
        self.store.put_traffic(&TrafficRecord {
            workload_id: workload.to_string(),
            routing,
            updated_at_ms: epoch_millis(),
        })?;
        Ok(())
    }
}

fn not_ready(workload: &str, generation: Generation) -> TrafficError {
    TrafficError::NotReady {
        workload: workload.to_string(),
        generation,
    }
}

/// Selector routing with `active` in front. Drops the old active side
/// from the ready set.
fn select_active(
    workload: &str,
    entry: &mut WorkloadEntry,
    active: Generation,
) -> TrafficResult<Routing> {
    if !entry.ready.contains(&active) {
        return Err(not_ready(workload, active));
    }
    let (previous, preview) = match entry.routing {
        Routing::Selector(sel) => (sel.active, sel.preview.filter(|p| *p != active)),
        Routing::Weighted(split) => (split.stable, None),
    };
    if let Some(previous) = previous.filter(|p| *p != active) {
        entry.ready.remove(&previous);
    }
    Ok(Routing::Selector(ServiceSelectors {
        active: Some(active),
        preview,
    }))
}

fn selector_active(routing: &Routing) -> Option<Generation> {
    match routing {
        Routing::Selector(sel) => sel.active,
        Routing::Weighted(split) => split.stable,
    }
}

/// Generations currently receiving any traffic.
fn routed_generations(routing: &Routing) -> Vec<Generation> {
    match routing {
        Routing::Weighted(split) => {
            let mut out: Vec<Generation> = split.stable.into_iter().collect();
            if split.canary_weight() > 0 {
                out.extend(split.canary);
            }
            out
        }
        Routing::Selector(sel) => sel.active.into_iter().chain(sel.preview).collect(),
    }
}
