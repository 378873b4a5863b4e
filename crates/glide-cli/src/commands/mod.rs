pub mod plan;
pub mod render;
pub mod validate;

use std::path::Path;

use anyhow::Context;
use glide_core::RolloutSpec;

/// Read and parse every Rollout document in `path`.
pub(crate) fn load_rollouts(path: &Path) -> anyhow::Result<Vec<RolloutSpec>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let specs = glide_core::parse_rollouts(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    if specs.is_empty() {
        anyhow::bail!("no Rollout documents in {}", path.display());
    }
    Ok(specs)
}
