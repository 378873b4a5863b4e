use std::path::Path;

use glide_core::StrategySpec;
use glidepath_rollout::PlannedStep;

pub fn plan(path: &str) -> anyhow::Result<()> {
    for spec in super::load_rollouts(Path::new(path))? {
        println!("{} ({})", spec.workload_id(), spec.strategy.label());
        if let StrategySpec::BlueGreen(bg) = &spec.strategy {
            println!(
                "  active service: {}, preview: {}",
                bg.active_service,
                bg.preview_service.as_deref().unwrap_or("-"),
            );
        }
        print!("{}", format_plan(&glidepath_rollout::plan(&spec.strategy)));
    }
    Ok(())
}

/// Render planned steps as an aligned table.
pub fn format_plan(steps: &[PlannedStep]) -> String {
    let width = steps
        .iter()
        .map(|s| s.description.len())
        .max()
        .unwrap_or(0)
        .max("STEP".len());

    let mut out = format!("  {:>3}  {:<width$}  {:>6}  {:>6}\n", "#", "STEP", "STABLE", "CANARY");
    for step in steps {
        out.push_str(&format!(
            "  {:>3}  {:<width$}  {:>5}%  {:>5}%{}\n",
            step.index + 1,
            step.description,
            step.stable_weight(),
            step.canary_weight,
            if step.blocks { "  (waits for resume)" } else { "" },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use glide_core::{CanarySpec, Step};

    #[test]
    fn table_shows_cumulative_split() {
        let strategy = StrategySpec::Canary(CanarySpec {
            steps: vec![
                Step::SetWeight(20),
                Step::Pause { duration_secs: None },
                Step::SetWeight(60),
            ],
        });
        let table = format_plan(&glidepath_rollout::plan(&strategy));
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[0].contains("STABLE"));
        assert!(lines[1].contains("80%") && lines[1].contains("20%"));
        assert!(lines[2].ends_with("(waits for resume)"));
        assert!(lines[2].contains("80%"));
        assert!(lines[3].contains("40%") && lines[3].contains("60%"));
    }
}
