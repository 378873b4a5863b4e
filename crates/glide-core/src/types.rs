//! Shared types used across Glidepath crates.
//!
//! These are the validated, strongly-typed form of a Rollout resource.
//! The raw YAML shape lives in [`crate::manifest`]; everything past the
//! parser works with these.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Workload identifier, `{namespace}/{name}`.
pub type WorkloadId = String;

/// Monotonically increasing revision number, scoped to one workload.
pub type Generation = u64;

/// A validated Rollout: what to run and how to shift traffic to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutSpec {
    pub namespace: String,
    pub name: String,
    pub replicas: u32,
    /// `selector.matchLabels`.
    pub selector: BTreeMap<String, String>,
    pub template: PodTemplate,
    pub strategy: StrategySpec,
}

impl RolloutSpec {
    /// `{namespace}/{name}`, the key every component uses.
    pub fn workload_id(&self) -> WorkloadId {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn gating_probe(&self) -> Option<&ProbeSpec> {
        self.template.gating_probe()
    }
}

/// Pod template snapshot. Becomes an immutable revision once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PodTemplate {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub service_account: Option<String>,
    pub containers: Vec<ContainerSpec>,
    /// Scheduling affinity, kept opaque.
    pub affinity: Option<serde_json::Value>,
}

impl PodTemplate {
    /// Stable content hash, used to detect resubmission of an
    /// unchanged template.
    pub fn template_hash(&self) -> String {
        // serde_json over BTreeMaps is deterministic.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(&digest[..5])
    }

    /// The probe used to judge a revision: the first container's
    /// readiness probe, falling back to its liveness probe.
    pub fn gating_probe(&self) -> Option<&ProbeSpec> {
        let container = self.containers.first()?;
        container
            .readiness_probe
            .as_ref()
            .or(container.liveness_probe.as_ref())
    }

    /// First declared container port.
    pub fn primary_port(&self) -> Option<u16> {
        self.containers
            .first()
            .and_then(|c| c.ports.first())
            .map(|p| p.container_port)
    }

    /// Image of the first container, if any.
    pub fn primary_image(&self) -> Option<&str> {
        self.containers.first().map(|c| c.image.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<ContainerPort>,
    pub resources: ResourceRequirements,
    pub readiness_probe: Option<ProbeSpec>,
    pub liveness_probe: Option<ProbeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceRequirements {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

/// A container probe with kubelet threshold semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub action: ProbeAction,
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
    pub timeout_seconds: u32,
    /// Consecutive successes before the verdict flips to passing.
    pub success_threshold: u32,
    /// Consecutive failures before the verdict flips to failing.
    pub failure_threshold: u32,
}

impl ProbeSpec {
    pub const DEFAULT_PERIOD_SECONDS: u32 = 10;
    pub const DEFAULT_TIMEOUT_SECONDS: u32 = 1;
    pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    /// A probe with default timings.
    pub fn new(action: ProbeAction) -> Self {
        Self {
            action,
            initial_delay_seconds: 0,
            period_seconds: Self::DEFAULT_PERIOD_SECONDS,
            timeout_seconds: Self::DEFAULT_TIMEOUT_SECONDS,
            success_threshold: Self::DEFAULT_SUCCESS_THRESHOLD,
            failure_threshold: Self::DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeAction {
    HttpGet { path: String, port: u16 },
    TcpSocket { port: u16 },
}

impl ProbeAction {
    pub fn port(&self) -> u16 {
        match self {
            ProbeAction::HttpGet { port, .. } | ProbeAction::TcpSocket { port } => *port,
        }
    }
}

/// How traffic moves from the stable revision to the new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    Canary(CanarySpec),
    BlueGreen(BlueGreenSpec),
}

impl StrategySpec {
    pub fn label(&self) -> &'static str {
        match self {
            StrategySpec::Canary(_) => "canary",
            StrategySpec::BlueGreen(_) => "blue-green",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CanarySpec {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueGreenSpec {
    pub active_service: String,
    pub preview_service: Option<String>,
    /// When false, only an explicit resume promotes the preview.
    pub auto_promotion_enabled: bool,
    /// Seconds of healthy preview before an automatic promotion.
    pub auto_promotion_seconds: u64,
}

/// One canary directive. Immutable once part of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Route this percentage of traffic to the new revision.
    SetWeight(u8),
    /// Hold. `None` waits for an explicit resume.
    Pause { duration_secs: Option<u64> },
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::SetWeight(w) => write!(f, "setWeight {w}%"),
            Step::Pause {
                duration_secs: Some(secs),
            } => write!(f, "pause {}", crate::duration::format_secs(*secs)),
            Step::Pause { duration_secs: None } => write!(f, "pause (until resumed)"),
        }
    }
}
