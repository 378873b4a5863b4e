pub mod config;
pub mod duration;
pub mod manifest;
pub mod types;

pub use config::GlideConfig;
pub use duration::parse_duration;
pub use manifest::{ManifestError, SecretManifest, parse_rollouts, parse_secrets};
pub use types::*;
