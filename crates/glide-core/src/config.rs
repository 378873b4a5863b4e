//! glide.toml configuration parser.
//!
//! Every section is optional. Accessors resolve defaults so callers never
//! deal with the raw `Option`s.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlideConfig {
    pub server: Option<ServerConfig>,
    pub state: Option<StateConfig>,
    pub controller: Option<ControllerConfig>,
    pub health: Option<HealthDefaults>,
    pub vault: Option<VaultConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How often each rollout worker re-evaluates its step.
    pub tick_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthDefaults {
    /// Poll period for rollouts whose template carries no probe.
    pub default_period: Option<String>,
    /// Address template for the probed revision, e.g. `{name}-canary.{namespace}.svc`.
    pub canary_host: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: Option<String>,
    pub auth_mount: Option<String>,
    pub role: Option<String>,
    pub token_path: Option<PathBuf>,
    /// PEM bundle trusted in addition to the webpki roots for `https://` vaults.
    pub ca_cert: Option<PathBuf>,
    pub secrets_dir: Option<PathBuf>,
    pub refresh_interval: Option<String>,
    pub max_attempts: Option<u32>,
}

impl GlideConfig {
    pub const DEFAULT_PORT: u16 = 8480;
    pub const DEFAULT_DATA_DIR: &'static str = "/var/lib/glidepath";

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GlideConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(Self::DEFAULT_PORT)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.state
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIR))
    }

    pub fn tick_interval(&self) -> Duration {
        self.controller
            .as_ref()
            .and_then(|c| c.tick_interval.as_deref())
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(1))
    }

    pub fn default_health_period(&self) -> Duration {
        self.health
            .as_ref()
            .and_then(|h| h.default_period.as_deref())
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(10))
    }

    /// Host the health evaluator probes for a workload's new revision.
    pub fn canary_host(&self, namespace: &str, name: &str) -> String {
        let template = self
            .health
            .as_ref()
            .and_then(|h| h.canary_host.as_deref())
            .unwrap_or("{name}-canary.{namespace}.svc");
        template
            .replace("{name}", name)
            .replace("{namespace}", namespace)
    }
}

impl VaultConfig {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or("http://127.0.0.1:8200")
    }

    pub fn auth_mount(&self) -> &str {
        self.auth_mount.as_deref().unwrap_or("kubernetes")
    }

    pub fn token_path(&self) -> PathBuf {
        self.token_path.clone().unwrap_or_else(|| {
            PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token")
        })
    }

    pub fn secrets_dir(&self) -> PathBuf {
        self.secrets_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/vault/secrets"))
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(300))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(5).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: GlideConfig = toml::from_str("").unwrap();
        assert_eq!(config.port(), 8480);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/glidepath"));
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.canary_host("shop", "front-end"), "front-end-canary.shop.svc");
        assert!(config.vault.is_none());
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[server]
port = 9000

[state]
data_dir = "/tmp/glide"

[controller]
tick_interval = "250ms"

[health]
default_period = "3s"
canary_host = "{name}.{namespace}.preview"

[vault]
address = "https://vault.vault.svc:8200"
role = "internal-app"
ca_cert = "/etc/glidepath/vault-ca.pem"
refresh_interval = "1m"
max_attempts = 0
"#;
        let config: GlideConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/glide"));
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.default_health_period(), Duration::from_secs(3));
        assert_eq!(config.canary_host("db", "mongodb"), "mongodb.db.preview");

        let vault = config.vault.unwrap();
        assert_eq!(vault.address(), "https://vault.vault.svc:8200");
        assert_eq!(vault.ca_cert, Some(PathBuf::from("/etc/glidepath/vault-ca.pem")));
        assert_eq!(vault.auth_mount(), "kubernetes");
        assert_eq!(vault.refresh_interval(), Duration::from_secs(60));
        // Zero attempts would never fetch; clamp to one.
        assert_eq!(vault.max_attempts(), 1);
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glide.toml");
        std::fs::write(&path, "[server]\nport = 8123\n").unwrap();
        let config = GlideConfig::from_file(&path).unwrap();
        assert_eq!(config.port(), 8123);
        assert!(config.to_toml_string().unwrap().contains("8123"));
    }
}
