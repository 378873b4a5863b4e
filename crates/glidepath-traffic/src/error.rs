use thiserror::Error;

use glidepath_state::{Generation, StateError};

pub type TrafficResult<T> = Result<T, TrafficError>;

#[derive(Debug, Error)]
pub enum TrafficError {
    #[error("unknown workload: {0}")]
    UnknownWorkload(String),

    #[error("{workload}: generation {generation} has no ready endpoints")]
    NotReady {
        workload: String,
        generation: Generation,
    },

    #[error("invalid weight {0}: must be within 0..=100")]
    InvalidWeight(u8),

    #[error(transparent)]
    State(#[from] StateError),
}
