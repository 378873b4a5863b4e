//! Where secrets come from.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Value, json};

use glide_core::SecretManifest;

use crate::error::{SecretError, SecretResult};

/// One fetched secret: the `data` object of a vault read response.
///
/// For KV v2 that is `{"data": {...}, "metadata": {"version": N, ...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretData {
    pub path: String,
    pub raw: Value,
}

impl SecretData {
    pub fn new(path: &str, raw: Value) -> Self {
        Self {
            path: path.to_string(),
            raw,
        }
    }

    /// A KV v2 shaped secret from plain key/value pairs.
    pub fn from_pairs(path: &str, pairs: &BTreeMap<String, String>, version: Option<u64>) -> Self {
        Self::new(
            path,
            json!({
                "data": pairs,
                "metadata": { "version": version },
            }),
        )
    }

    /// KV v2 `metadata.version`. `None` for unversioned engines.
    pub fn version(&self) -> Option<u64> {
        self.raw
            .get("metadata")
            .and_then(|m| m.get("version"))
            .and_then(Value::as_u64)
    }

    /// Secret key/value pairs: `data.data` for KV v2, `data` otherwise.
    pub fn values(&self) -> Option<&serde_json::Map<String, Value>> {
        match self.raw.get("data") {
            Some(Value::Object(inner)) if self.raw.get("metadata").is_some() => Some(inner),
            _ => self.raw.as_object(),
        }
    }
}

/// Fetches secrets by path.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self, path: &str) -> SecretResult<SecretData>;
}

/// Static source backed by Kubernetes `Secret` manifests.
///
/// Used where no vault is reachable: the secret's decoded keys are
/// served as a KV v2 secret. Bound paths take precedence; the default
/// secret, if set, answers every other path.
#[derive(Debug, Clone, Default)]
pub struct KubeSecretSource {
    bound: BTreeMap<String, BTreeMap<String, String>>,
    default: Option<BTreeMap<String, String>>,
}

impl KubeSecretSource {
    /// Serve `manifest` for every path.
    pub fn from_manifest(manifest: &SecretManifest) -> SecretResult<Self> {
        Ok(Self {
            bound: BTreeMap::new(),
            default: Some(decode(manifest)?),
        })
    }

    /// Serve `manifest` for `path` only.
    pub fn bind(mut self, path: &str, manifest: &SecretManifest) -> SecretResult<Self> {
        self.bound.insert(path.to_string(), decode(manifest)?);
        Ok(self)
    }
}

#[async_trait]
impl SecretSource for KubeSecretSource {
    async fn fetch(&self, path: &str) -> SecretResult<SecretData> {
        let pairs = self
            .bound
            .get(path)
            .or(self.default.as_ref())
            .ok_or_else(|| SecretError::Status {
                status: 404,
                path: path.to_string(),
            })?;
        Ok(SecretData::from_pairs(path, pairs, None))
    }
}

fn decode(manifest: &SecretManifest) -> SecretResult<BTreeMap<String, String>> {
    manifest
        .decoded_all()
        .map_err(|e| SecretError::Decode(e.to_string()))
}
