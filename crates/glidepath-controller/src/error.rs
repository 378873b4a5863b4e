use thiserror::Error;

use glide_core::ManifestError;
use glidepath_rollout::EngineError;
use glidepath_state::StateError;
use glidepath_traffic::TrafficError;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("rollout not found: {0}")]
    NotFound(String),

    #[error("rollout worker for {0} has stopped")]
    Closed(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Traffic(#[from] TrafficError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
