//! Rollout resource documents (argoproj.io/v1alpha1 `Rollout`) and the
//! Kubernetes `Secret` fallback.
//!
//! The raw structs mirror the YAML shape one-to-one; [`parse_rollouts`]
//! validates them into [`RolloutSpec`]. Multi-document input is accepted
//! and documents of other kinds are skipped.

use std::collections::BTreeMap;

use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::*;

pub const ROLLOUT_KIND: &str = "Rollout";
pub const SECRET_KIND: &str = "Secret";

/// Longest pause or promotion delay, in seconds, that still fits in a
/// millisecond deadline.
pub const MAX_DURATION_SECS: u64 = u64::MAX / 1000 / 2;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{resource}: missing field `{field}`")]
    MissingField { resource: String, field: String },

    #[error("{resource}: step {index}: {reason}")]
    InvalidStep {
        resource: String,
        index: usize,
        reason: String,
    },

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("{resource}: {reason}")]
    UnsupportedStrategy { resource: String, reason: String },

    #[error("{resource}: probe port `{port}` does not name a container port")]
    UnknownPort { resource: String, port: String },

    #[error("secret {secret}: key `{key}`: {reason}")]
    Decode {
        secret: String,
        key: String,
        reason: String,
    },
}

pub type ManifestResult<T> = Result<T, ManifestError>;

// ── Raw document shape ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutManifest {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: RolloutManifestSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutManifestSpec {
    pub replicas: Option<u32>,
    pub selector: Option<LabelSelector>,
    pub template: PodTemplateManifest,
    pub strategy: StrategyManifest,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PodTemplateManifest {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: PodSpecManifest,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecManifest {
    #[serde(default)]
    pub containers: Vec<ContainerManifest>,
    pub affinity: Option<serde_json::Value>,
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerManifest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<ContainerPortManifest>,
    #[serde(default)]
    pub resources: ResourcesManifest,
    pub readiness_probe: Option<ProbeManifest>,
    pub liveness_probe: Option<ProbeManifest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortManifest {
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesManifest {
    #[serde(default)]
    pub requests: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub limits: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeManifest {
    pub http_get: Option<HttpGetManifest>,
    pub tcp_socket: Option<TcpSocketManifest>,
    pub initial_delay_seconds: Option<u32>,
    pub period_seconds: Option<u32>,
    pub timeout_seconds: Option<u32>,
    pub success_threshold: Option<u32>,
    pub failure_threshold: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpGetManifest {
    #[serde(default = "default_probe_path")]
    pub path: String,
    pub port: IntOrString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpSocketManifest {
    pub port: IntOrString,
}

/// Kubernetes `IntOrString`: ports by number or by name, durations as
/// seconds or as "1h".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(u64),
    Str(String),
}

impl std::fmt::Display for IntOrString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntOrString::Int(n) => write!(f, "{n}"),
            IntOrString::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyManifest {
    pub canary: Option<CanaryManifest>,
    pub blue_green: Option<BlueGreenManifest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CanaryManifest {
    #[serde(default)]
    pub steps: Vec<StepManifest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepManifest {
    pub set_weight: Option<i64>,
    pub pause: Option<PauseManifest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PauseManifest {
    pub duration: Option<IntOrString>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenManifest {
    pub active_service: Option<String>,
    pub preview_service: Option<String>,
    pub auto_promotion_enabled: Option<bool>,
    pub auto_promotion_seconds: Option<u64>,
}

fn default_probe_path() -> String {
    "/".to_string()
}

// ── Validation ─────────────────────────────────────────────────────

impl RolloutManifest {
    fn resource_name(&self) -> String {
        format!("{}/{}", self.namespace(), self.metadata.name)
    }

    fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Validate the raw document into a [`RolloutSpec`].
    pub fn into_spec(self) -> ManifestResult<RolloutSpec> {
        let resource = self.resource_name();
        let missing = |field: &str| ManifestError::MissingField {
            resource: resource.clone(),
            field: field.to_string(),
        };

        if self.metadata.name.is_empty() {
            return Err(missing("metadata.name"));
        }
        let selector = self
            .spec
            .selector
            .as_ref()
            .ok_or_else(|| missing("spec.selector"))?
            .match_labels
            .clone();
        if self.spec.template.spec.containers.is_empty() {
            return Err(missing("spec.template.spec.containers"));
        }

        let strategy = convert_strategy(&resource, &self.spec.strategy)?;
        let containers = self
            .spec
            .template
            .spec
            .containers
            .iter()
            .map(|c| convert_container(&resource, c))
            .collect::<ManifestResult<Vec<_>>>()?;

        Ok(RolloutSpec {
            namespace: self.namespace().to_string(),
            name: self.metadata.name.clone(),
            replicas: self.spec.replicas.unwrap_or(1),
            selector,
            template: PodTemplate {
                labels: self.spec.template.metadata.labels,
                annotations: self.spec.template.metadata.annotations,
                service_account: self.spec.template.spec.service_account_name,
                containers,
                affinity: self.spec.template.spec.affinity,
            },
            strategy,
        })
    }
}

fn convert_strategy(resource: &str, raw: &StrategyManifest) -> ManifestResult<StrategySpec> {
    match (&raw.canary, &raw.blue_green) {
        (Some(canary), None) => {
            let steps = canary
                .steps
                .iter()
                .enumerate()
                .map(|(index, step)| convert_step(resource, index, step))
                .collect::<ManifestResult<Vec<_>>>()?;
            Ok(StrategySpec::Canary(CanarySpec { steps }))
        }
        (None, Some(bg)) => {
            let active_service =
                bg.active_service
                    .clone()
                    .ok_or_else(|| ManifestError::MissingField {
                        resource: resource.to_string(),
                        field: "spec.strategy.blueGreen.activeService".to_string(),
                    })?;
            Ok(StrategySpec::BlueGreen(BlueGreenSpec {
                active_service,
                preview_service: bg.preview_service.clone(),
                auto_promotion_enabled: bg.auto_promotion_enabled.unwrap_or(true),
                auto_promotion_seconds: match bg.auto_promotion_seconds {
                    Some(secs) => bounded_secs(secs, &secs.to_string())?,
                    None => 0,
                },
            }))
        }
        (Some(_), Some(_)) => Err(ManifestError::UnsupportedStrategy {
            resource: resource.to_string(),
            reason: "both canary and blueGreen are set".to_string(),
        }),
        (None, None) => Err(ManifestError::UnsupportedStrategy {
            resource: resource.to_string(),
            reason: "strategy must set canary or blueGreen".to_string(),
        }),
    }
}

fn convert_step(resource: &str, index: usize, raw: &StepManifest) -> ManifestResult<Step> {
    let invalid = |reason: String| ManifestError::InvalidStep {
        resource: resource.to_string(),
        index,
        reason,
    };
    match (raw.set_weight, &raw.pause) {
        (Some(weight), None) => {
            if !(0..=100).contains(&weight) {
                return Err(invalid(format!("setWeight {weight} outside 0..=100")));
            }
            Ok(Step::SetWeight(weight as u8))
        }
        (None, Some(pause)) => {
            let duration_secs = match &pause.duration {
                None => None,
                Some(IntOrString::Int(secs)) => Some(bounded_secs(*secs, &secs.to_string())?),
                Some(IntOrString::Str(s)) => Some(bounded_secs(
                    parse_duration(s)
                        .ok_or_else(|| ManifestError::InvalidDuration(s.clone()))?
                        .as_secs(),
                    s,
                )?),
            };
            Ok(Step::Pause { duration_secs })
        }
        (Some(_), Some(_)) => Err(invalid("step sets both setWeight and pause".to_string())),
        (None, None) => Err(invalid("step must be setWeight or pause".to_string())),
    }
}

/// Durations are stored as epoch-millisecond deadlines, so they must
/// fit in milliseconds.
fn bounded_secs(secs: u64, raw: &str) -> ManifestResult<u64> {
    if secs > MAX_DURATION_SECS {
        return Err(ManifestError::InvalidDuration(raw.to_string()));
    }
    Ok(secs)
}

fn convert_container(resource: &str, raw: &ContainerManifest) -> ManifestResult<ContainerSpec> {
    let ports: Vec<ContainerPort> = raw
        .ports
        .iter()
        .map(|p| ContainerPort {
            name: p.name.clone(),
            container_port: p.container_port,
        })
        .collect();

    let probe = |p: &Option<ProbeManifest>| -> ManifestResult<Option<ProbeSpec>> {
        p.as_ref()
            .map(|p| convert_probe(resource, p, &ports))
            .transpose()
    };

    Ok(ContainerSpec {
        name: raw.name.clone(),
        image: raw.image.clone(),
        readiness_probe: probe(&raw.readiness_probe)?,
        liveness_probe: probe(&raw.liveness_probe)?,
        resources: ResourceRequirements {
            requests: quantities(&raw.resources.requests),
            limits: quantities(&raw.resources.limits),
        },
        ports,
    })
}

fn convert_probe(
    resource: &str,
    raw: &ProbeManifest,
    ports: &[ContainerPort],
) -> ManifestResult<ProbeSpec> {
    let action = match (&raw.http_get, &raw.tcp_socket) {
        (Some(http), _) => ProbeAction::HttpGet {
            path: http.path.clone(),
            port: resolve_port(resource, &http.port, ports)?,
        },
        (None, Some(tcp)) => ProbeAction::TcpSocket {
            port: resolve_port(resource, &tcp.port, ports)?,
        },
        (None, None) => {
            return Err(ManifestError::MissingField {
                resource: resource.to_string(),
                field: "probe.httpGet or probe.tcpSocket".to_string(),
            });
        }
    };

    let mut probe = ProbeSpec::new(action);
    probe.initial_delay_seconds = raw.initial_delay_seconds.unwrap_or(0);
    probe.period_seconds = raw
        .period_seconds
        .unwrap_or(ProbeSpec::DEFAULT_PERIOD_SECONDS)
        .max(1);
    probe.timeout_seconds = raw
        .timeout_seconds
        .unwrap_or(ProbeSpec::DEFAULT_TIMEOUT_SECONDS)
        .max(1);
    probe.success_threshold = raw
        .success_threshold
        .unwrap_or(ProbeSpec::DEFAULT_SUCCESS_THRESHOLD)
        .max(1);
    probe.failure_threshold = raw
        .failure_threshold
        .unwrap_or(ProbeSpec::DEFAULT_FAILURE_THRESHOLD)
        .max(1);
    Ok(probe)
}

fn resolve_port(resource: &str, port: &IntOrString, ports: &[ContainerPort]) -> ManifestResult<u16> {
    let unknown = || ManifestError::UnknownPort {
        resource: resource.to_string(),
        port: port.to_string(),
    };
    match port {
        IntOrString::Int(n) => u16::try_from(*n).map_err(|_| unknown()),
        IntOrString::Str(s) => match s.parse::<u16>() {
            Ok(n) => Ok(n),
            Err(_) => ports
                .iter()
                .find(|p| p.name.as_deref() == Some(s.as_str()))
                .map(|p| p.container_port)
                .ok_or_else(unknown),
        },
    }
}

/// Resource quantities may be written as numbers (`cpu: 1`) or strings.
fn quantities(raw: &BTreeMap<String, serde_yaml::Value>) -> BTreeMap<String, String> {
    raw.iter()
        .map(|(k, v)| {
            let value = match v {
                serde_yaml::Value::String(s) => s.clone(),
                serde_yaml::Value::Number(n) => n.to_string(),
                other => serde_yaml::to_string(other)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

// ── Secret fallback ────────────────────────────────────────────────

/// A Kubernetes `Secret` with base64-encoded `data`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretManifest {
    pub metadata: ObjectMeta,
    #[serde(rename = "type")]
    pub secret_type: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
}

impl SecretManifest {
    /// Plain-text value of `key`. `stringData` wins over `data`, as it
    /// does on the API server.
    pub fn decoded(&self, key: &str) -> ManifestResult<Option<String>> {
        if let Some(plain) = self.string_data.get(key) {
            return Ok(Some(plain.clone()));
        }
        let Some(encoded) = self.data.get(key) else {
            return Ok(None);
        };
        let decode_err = |reason: String| ManifestError::Decode {
            secret: self.metadata.name.clone(),
            key: key.to_string(),
            reason,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| decode_err(e.to_string()))?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| decode_err(e.to_string()))
    }

    /// All keys decoded into plain text.
    pub fn decoded_all(&self) -> ManifestResult<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        for key in self.data.keys().chain(self.string_data.keys()) {
            if let Some(value) = self.decoded(key)? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }
}

// ── Entry points ───────────────────────────────────────────────────

/// Split a (possibly multi-document) YAML string into documents of `kind`.
fn documents_of_kind(input: &str, kind: &str) -> ManifestResult<Vec<serde_yaml::Value>> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        if value.get("kind").and_then(|k| k.as_str()) == Some(kind) {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Parse every `Rollout` document in `input`.
pub fn parse_rollouts(input: &str) -> ManifestResult<Vec<RolloutSpec>> {
    documents_of_kind(input, ROLLOUT_KIND)?
        .into_iter()
        .map(|doc| serde_yaml::from_value::<RolloutManifest>(doc)?.into_spec())
        .collect()
}

/// Parse every `Secret` document in `input`.
pub fn parse_secrets(input: &str) -> ManifestResult<Vec<SecretManifest>> {
    documents_of_kind(input, SECRET_KIND)?
        .into_iter()
        .map(|doc| Ok(serde_yaml::from_value::<SecretManifest>(doc)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const CANARY: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: Rollout
metadata:
  name: front-end
  namespace: shop
spec:
  replicas: 5
  selector:
    matchLabels:
      app: front-end
  template:
    metadata:
      labels:
        app: front-end
      annotations:
        vault.hashicorp.com/agent-inject: "true"
        vault.hashicorp.com/role: "internal-app"
        vault.hashicorp.com/agent-inject-secret-database-config.txt: "internal/data/database/config"
    spec:
      serviceAccountName: internal-app
      affinity:
        podAntiAffinity:
          preferredDuringSchedulingIgnoredDuringExecution:
            - weight: 100
              podAffinityTerm:
                topologyKey: kubernetes.io/hostname
      containers:
        - name: front-end
          image: registry.example.com/front-end:1.4.0
          ports:
            - name: http
              containerPort: 8079
          resources:
            requests:
              cpu: 100m
              memory: 128Mi
            limits:
              cpu: 1
          readinessProbe:
            httpGet:
              path: /health
              port: http
            initialDelaySeconds: 5
            periodSeconds: 3
            failureThreshold: 2
  strategy:
    canary:
      steps:
        - setWeight: 20
        - pause: {}
        - setWeight: 40
        - pause: {duration: 10}
        - setWeight: 60
        - pause: {duration: 1m}
        - setWeight: 80
"#;

    const BLUE_GREEN: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: Rollout
metadata:
  name: mongodb
spec:
  replicas: 2
  selector:
    matchLabels:
      app: mongodb
  template:
    metadata:
      labels:
        app: mongodb
    spec:
      affinity:
        nodeAffinity:
          requiredDuringSchedulingIgnoredDuringExecution:
            nodeSelectorTerms:
              - matchExpressions:
                  - key: workload
                    operator: In
                    values: ["db"]
      containers:
        - name: mongodb
          image: mongo:6.0
          ports:
            - containerPort: 27017
          livenessProbe:
            tcpSocket:
              port: 27017
  strategy:
    blueGreen:
      activeService: mongodb-active
      previewService: mongodb-preview
      autoPromotionEnabled: false
"#;

    #[test]
    fn parses_canary_rollout() {
        let specs = parse_rollouts(CANARY).unwrap();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.workload_id(), "shop/front-end");
        assert_eq!(spec.replicas, 5);
        assert_eq!(spec.selector["app"], "front-end");

        let StrategySpec::Canary(canary) = &spec.strategy else {
            panic!("expected canary");
        };
        assert_eq!(
            canary.steps,
            vec![
                Step::SetWeight(20),
                Step::Pause { duration_secs: None },
                Step::SetWeight(40),
                Step::Pause { duration_secs: Some(10) },
                Step::SetWeight(60),
                Step::Pause { duration_secs: Some(60) },
                Step::SetWeight(80),
            ]
        );

        let container = &spec.template.containers[0];
        assert_eq!(container.resources.limits["cpu"], "1");
        assert_eq!(container.resources.requests["memory"], "128Mi");
        let probe = container.readiness_probe.as_ref().unwrap();
        assert_eq!(
            probe.action,
            ProbeAction::HttpGet {
                path: "/health".to_string(),
                port: 8079
            }
        );
        assert_eq!(probe.initial_delay_seconds, 5);
        assert_eq!(probe.period_seconds, 3);
        assert_eq!(probe.failure_threshold, 2);
        assert_eq!(probe.success_threshold, 1);
        assert!(spec.template.affinity.is_some());
        assert_eq!(spec.template.service_account.as_deref(), Some("internal-app"));
    }

    #[test]
    fn parses_blue_green_rollout_with_default_namespace() {
        let spec = parse_rollouts(BLUE_GREEN).unwrap().remove(0);
        assert_eq!(spec.workload_id(), "default/mongodb");
        let StrategySpec::BlueGreen(bg) = &spec.strategy else {
            panic!("expected blue-green");
        };
        assert_eq!(bg.active_service, "mongodb-active");
        assert_eq!(bg.preview_service.as_deref(), Some("mongodb-preview"));
        assert!(!bg.auto_promotion_enabled);
        assert_eq!(
            spec.gating_probe().unwrap().action,
            ProbeAction::TcpSocket { port: 27017 }
        );
    }

    #[test]
    fn multi_document_skips_other_kinds() {
        let input = format!(
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: mongodb-active\n---\n{BLUE_GREEN}\n---\n"
        );
        let specs = parse_rollouts(&input).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "mongodb");
    }

    #[test]
    fn rejects_weight_over_100() {
        let input = CANARY.replace("setWeight: 80", "setWeight: 180");
        let err = parse_rollouts(&input).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidStep { index: 6, .. }), "{err}");
    }

    #[test]
    fn rejects_missing_strategy() {
        let input = BLUE_GREEN.replace("blueGreen:", "rolling:");
        let err = parse_rollouts(&input).unwrap_err();
        // serde ignores the unknown key, so neither strategy is set.
        assert!(matches!(err, ManifestError::UnsupportedStrategy { .. }), "{err}");
    }

    #[test]
    fn rejects_unknown_named_port() {
        let input = CANARY.replace("port: http", "port: grpc");
        let err = parse_rollouts(&input).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownPort { .. }), "{err}");
    }

    #[test]
    fn rejects_bad_pause_duration() {
        let input = CANARY.replace("duration: 1m", "duration: soon");
        let err = parse_rollouts(&input).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDuration(_)), "{err}");
    }

    #[test]
    fn rejects_durations_beyond_millisecond_range() {
        let input = CANARY.replace("duration: 1m", "duration: 18446744073709552");
        let err = parse_rollouts(&input).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDuration(_)), "{err}");

        let input = CANARY.replace("duration: 1m", "duration: 5124095576030432h");
        let err = parse_rollouts(&input).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDuration(_)), "{err}");

        let input = BLUE_GREEN.replace(
            "autoPromotionEnabled: false",
            "autoPromotionEnabled: true\n      autoPromotionSeconds: 18446744073709551615",
        );
        let err = parse_rollouts(&input).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDuration(_)), "{err}");
    }

    #[test]
    fn decodes_secret_fallback() {
        let input = r#"
apiVersion: v1
kind: Secret
metadata:
  name: db-credentials
type: Opaque
data:
  username: YWRtaW4=
  password: czNjcjN0
"#;
        let secret = parse_secrets(input).unwrap().remove(0);
        assert_eq!(secret.decoded("username").unwrap().as_deref(), Some("admin"));
        assert_eq!(secret.decoded("password").unwrap().as_deref(), Some("s3cr3t"));
        assert_eq!(secret.decoded("missing").unwrap(), None);
        assert_eq!(secret.decoded_all().unwrap().len(), 2);
    }

    #[test]
    fn secret_with_invalid_base64_errors() {
        let input = "kind: Secret\nmetadata:\n  name: bad\ndata:\n  username: '!!!'\n";
        let secret = parse_secrets(input).unwrap().remove(0);
        assert!(matches!(
            secret.decoded("username"),
            Err(ManifestError::Decode { .. })
        ));
    }
}
