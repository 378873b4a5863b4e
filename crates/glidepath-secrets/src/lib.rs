//! glidepath-secrets: credentials for rollout workloads.
//!
//! Reads vault agent annotations from a pod template, authenticates with
//! the workload's service-account token, fetches KV v2 secrets and
//! renders them into files. Rendering is fail-closed: until every file
//! has been written once, the readiness signal stays `false`.
//!
//! # Components
//!
//! - **`annotations`** - `vault.hashicorp.com/*` annotation parsing
//! - **`template`** - `{{ with secret "path" }}` template rendering
//! - **`source`** - `SecretSource` trait and the Kubernetes Secret fallback
//! - **`vault`** - Vault HTTP client (kubernetes auth, KV v2 reads)
//! - **`bridge`** - Retry budget, atomic file writes, periodic refresh

pub mod annotations;
pub mod bridge;
pub mod error;
pub mod source;
pub mod template;
pub mod vault;

pub use annotations::{SecretFile, VaultAnnotations};
pub use bridge::SecretBridge;
pub use error::{SecretError, SecretResult};
pub use source::{KubeSecretSource, SecretData, SecretSource};
pub use template::{render, secret_paths};
pub use vault::VaultClient;
