//! Vault agent annotations on a pod template.
//!
//! ```yaml
//! vault.hashicorp.com/agent-inject: "true"
//! vault.hashicorp.com/role: "internal-app"
//! vault.hashicorp.com/agent-inject-secret-database-config.txt: "internal/data/database/config"
//! vault.hashicorp.com/agent-inject-template-database-config.txt: |
//!   {{- with secret "internal/data/database/config" -}}
//!   postgresql://{{ .Data.data.username }}:{{ .Data.data.password }}@postgres:5432/wizard
//!   {{- end -}}
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{SecretError, SecretResult};

const PREFIX: &str = "vault.hashicorp.com/";
const INJECT: &str = "vault.hashicorp.com/agent-inject";
const ROLE: &str = "vault.hashicorp.com/role";
const SECRET_PREFIX: &str = "vault.hashicorp.com/agent-inject-secret-";
const TEMPLATE_PREFIX: &str = "vault.hashicorp.com/agent-inject-template-";

/// One rendered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretFile {
    /// File name under the secrets directory.
    pub name: String,
    /// Vault path, e.g. `internal/data/database/config`.
    pub path: String,
    /// Custom template; the default renders every key as `key: value`.
    pub template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultAnnotations {
    pub role: Option<String>,
    pub files: Vec<SecretFile>,
}

impl VaultAnnotations {
    /// Parse the annotations of a pod template.
    ///
    /// Returns `None` unless `agent-inject` is `"true"`. A template
    /// annotation without a matching secret annotation is an error.
    pub fn parse(annotations: &BTreeMap<String, String>) -> SecretResult<Option<Self>> {
        let enabled = annotations
            .get(INJECT)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if !enabled {
            return Ok(None);
        }

        let mut files: BTreeMap<String, SecretFile> = BTreeMap::new();
        for (key, value) in annotations {
            if let Some(name) = key.strip_prefix(SECRET_PREFIX) {
                validate_file_name(key, name)?;
                let path = value.trim();
                if path.is_empty() {
                    return Err(SecretError::Annotation {
                        key: key.clone(),
                        reason: "empty secret path".to_string(),
                    });
                }
                files.insert(
                    name.to_string(),
                    SecretFile {
                        name: name.to_string(),
                        path: path.to_string(),
                        template: None,
                    },
                );
            }
        }

        for (key, value) in annotations {
            if let Some(name) = key.strip_prefix(TEMPLATE_PREFIX) {
                let file = files.get_mut(name).ok_or_else(|| SecretError::Annotation {
                    key: key.clone(),
                    reason: format!("no {SECRET_PREFIX}{name} annotation"),
                })?;
                file.template = Some(value.clone());
            }
        }

        Ok(Some(Self {
            role: annotations.get(ROLE).map(|r| r.trim().to_string()),
            files: files.into_values().collect(),
        }))
    }

    /// Whether any `vault.hashicorp.com/` annotation is present.
    pub fn mentions_vault(annotations: &BTreeMap<String, String>) -> bool {
        annotations.keys().any(|k| k.starts_with(PREFIX))
    }
}

fn validate_file_name(key: &str, name: &str) -> SecretResult<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(SecretError::Annotation {
            key: key.to_string(),
            reason: format!("`{name}` is not a plain file name"),
        });
    }
    Ok(())
}
