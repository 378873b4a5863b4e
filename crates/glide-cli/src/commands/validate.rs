use std::path::Path;

use glide_core::{ProbeAction, RolloutSpec, StrategySpec};
use glidepath_secrets::VaultAnnotations;
use serde_json::{Value, json};

pub fn validate(path: &str, format: &str) -> anyhow::Result<()> {
    let specs = super::load_rollouts(Path::new(path))?;

    let mut summaries = Vec::with_capacity(specs.len());
    for spec in &specs {
        summaries.push(summarize(spec)?);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summaries)?),
        _ => {
            for summary in &summaries {
                println!("✓ {}", describe(summary));
            }
        }
    }
    Ok(())
}

/// Everything `glided` would derive from a Rollout before it is accepted.
fn summarize(spec: &RolloutSpec) -> anyhow::Result<Value> {
    let vault = VaultAnnotations::parse(&spec.template.annotations)
        .map_err(|e| anyhow::anyhow!("{}: {e}", spec.workload_id()))?;

    let steps = match &spec.strategy {
        StrategySpec::Canary(canary) => canary.steps.len(),
        StrategySpec::BlueGreen(_) => 0,
    };
    let probe = spec.gating_probe().map(|p| match &p.action {
        ProbeAction::HttpGet { path, port } => format!("httpGet :{port}{path}"),
        ProbeAction::TcpSocket { port } => format!("tcpSocket :{port}"),
    });

    Ok(json!({
        "rollout": spec.workload_id(),
        "strategy": spec.strategy.label(),
        "steps": steps,
        "replicas": spec.replicas,
        "template_hash": spec.template.template_hash(),
        "image": spec.template.primary_image(),
        "probe": probe,
        "secret_files": vault.map(|v| v.files.len()).unwrap_or(0),
    }))
}

fn describe(summary: &Value) -> String {
    let mut line = format!(
        "{} ({}, template {})",
        summary["rollout"].as_str().unwrap_or_default(),
        summary["strategy"].as_str().unwrap_or_default(),
        summary["template_hash"].as_str().unwrap_or_default(),
    );
    if let Some(image) = summary["image"].as_str() {
        line.push_str(&format!("\n  image:   {image}"));
    }
    if summary["strategy"] == "canary" {
        line.push_str(&format!("\n  steps:   {}", summary["steps"]));
    }
    match summary["probe"].as_str() {
        Some(probe) => line.push_str(&format!("\n  probe:   {probe}")),
        None => line.push_str("\n  probe:   none (tcp on primary port if declared)"),
    }
    let files = summary["secret_files"].as_u64().unwrap_or(0);
    if files > 0 {
        line.push_str(&format!("\n  secrets: {files} file(s)"));
    }
    line
}
