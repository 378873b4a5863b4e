//! Engine actions to traffic changes.

use tracing::debug;

use glidepath_rollout::TrafficAction;
use glidepath_state::{Generation, Routing, ServiceSelectors, StrategySpec, TrafficSplit};
use glidepath_traffic::{TrafficController, TrafficResult};

/// Apply one engine action to a workload's traffic table.
pub fn apply(traffic: &TrafficController, workload: &str, action: TrafficAction) -> TrafficResult<()> {
    debug!(workload, ?action, "applying traffic action");
    match action {
        TrafficAction::SetWeight { canary, percent } => {
            traffic.set_weight(workload, canary, percent)?;
        }
        TrafficAction::SetPreview { preview } => traffic.set_preview(workload, preview)?,
        TrafficAction::Promote { revision } => match traffic.snapshot(workload) {
            Some(Routing::Selector(_)) => traffic.switch_selector(workload, revision)?,
            _ => traffic.promote(workload, revision)?,
        },
        TrafficAction::Rollback { stable } => traffic.rollback(workload, stable)?,
    }
    Ok(())
}

/// Routing a workload starts a rollout from: everything on `stable`.
pub fn initial_routing(strategy: &StrategySpec, stable: Option<Generation>) -> Routing {
    match strategy {
        StrategySpec::Canary(_) => Routing::Weighted(TrafficSplit::all_stable(stable)),
        StrategySpec::BlueGreen(_) => Routing::Selector(ServiceSelectors {
            active: stable,
            preview: None,
        }),
    }
}
