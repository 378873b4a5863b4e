//! Step plans.
//!
//! `plan` walks a strategy without health gating and reports the traffic
//! split after each step. `glide plan` prints it; the engine itself never
//! calls it.

use serde::Serialize;

use glidepath_state::{Step, StrategySpec};

/// One row of a rollout plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub index: usize,
    pub description: String,
    /// Canary weight in effect once this step has run.
    pub canary_weight: u8,
    /// Whether the rollout waits here for an explicit resume.
    pub blocks: bool,
}

impl PlannedStep {
    pub fn stable_weight(&self) -> u8 {
        100 - self.canary_weight
    }
}

/// Steps a strategy walks through, ending in the promotion.
pub fn plan(strategy: &StrategySpec) -> Vec<PlannedStep> {
    let mut rows = Vec::new();
    match strategy {
        StrategySpec::Canary(canary) => {
            let mut weight = 0u8;
            for (index, step) in canary.steps.iter().enumerate() {
                let blocks = match step {
                    Step::SetWeight(w) => {
                        weight = (*w).min(100);
                        false
                    }
                    Step::Pause { duration_secs } => duration_secs.is_none(),
                };
                rows.push(PlannedStep {
                    index,
                    description: step.to_string(),
                    canary_weight: weight,
                    blocks,
                });
            }
        }
        StrategySpec::BlueGreen(bg) => {
            let preview = bg.preview_service.as_deref().unwrap_or("(none)");
            rows.push(PlannedStep {
                index: 0,
                description: format!("deploy preview behind {preview}"),
                canary_weight: 0,
                blocks: false,
            });
            let (description, blocks) = if !bg.auto_promotion_enabled {
                ("await manual promotion".to_string(), true)
            } else if bg.auto_promotion_seconds > 0 {
                (
                    format!(
                        "auto-promote after {}",
                        glide_core::duration::format_secs(bg.auto_promotion_seconds)
                    ),
                    false,
                )
            } else {
                ("auto-promote when healthy".to_string(), false)
            };
            rows.push(PlannedStep {
                index: 1,
                description,
                canary_weight: 0,
                blocks,
            });
        }
    }

    let index = rows.len();
    rows.push(PlannedStep {
        index,
        description: "promote".to_string(),
        canary_weight: 100,
        blocks: false,
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use glide_core::{BlueGreenSpec, CanarySpec};

    #[test]
    fn canary_plan_carries_weight_through_pauses() {
        let spec = StrategySpec::Canary(CanarySpec {
            steps: vec![
                Step::SetWeight(20),
                Step::Pause { duration_secs: None },
                Step::SetWeight(40),
                Step::Pause { duration_secs: Some(600) },
            ],
        });
        let rows = plan(&spec);
        let weights: Vec<u8> = rows.iter().map(|r| r.canary_weight).collect();
        assert_eq!(weights, vec![20, 20, 40, 40, 100]);
        assert!(rows[1].blocks);
        assert!(!rows[3].blocks);
        assert_eq!(rows[3].description, "pause 10m");
        assert_eq!(rows[0].stable_weight(), 80);
        assert_eq!(rows.last().unwrap().description, "promote");
    }

    #[test]
    fn blue_green_plan_manual() {
        let spec = StrategySpec::BlueGreen(BlueGreenSpec {
            active_service: "mongodb".to_string(),
            preview_service: Some("mongodb-preview".to_string()),
            auto_promotion_enabled: false,
            auto_promotion_seconds: 0,
        });
        let rows = plan(&spec);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].description, "deploy preview behind mongodb-preview");
        assert!(rows[1].blocks);
    }

    #[test]
    fn blue_green_plan_delayed() {
        let spec = StrategySpec::BlueGreen(BlueGreenSpec {
            active_service: "web".to_string(),
            preview_service: None,
            auto_promotion_enabled: true,
            auto_promotion_seconds: 30,
        });
        let rows = plan(&spec);
        assert_eq!(rows[1].description, "auto-promote after 30s");
        assert!(!rows[1].blocks);
    }
}
