//! glidepath-api: REST API for Glidepath.
//!
//! Thin axum layer over `RolloutController`. Every response uses the
//! `{success, data, error}` envelope. Rollout ids are `{namespace}/{name}`
//! and must be URL-encoded in paths (`shop%2Ffront-end`).
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/rollouts` | List rollouts |
//! | POST | `/api/v1/rollouts` | Submit Rollout documents (YAML or JSON) |
//! | GET | `/api/v1/rollouts/{id}` | Rollout status |
//! | POST | `/api/v1/rollouts/{id}/resume` | Clear a pause |
//! | POST | `/api/v1/rollouts/{id}/pause` | Operator pause |
//! | POST | `/api/v1/rollouts/{id}/abort` | Abort and restore stable |
//! | GET | `/api/v1/rollouts/{id}/history` | Every rollout of the workload, oldest first |
//! | GET | `/api/v1/rollouts/{id}/revisions` | Revision history |
//! | GET | `/api/v1/rollouts/{id}/traffic` | Current routing |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use glidepath_controller::RolloutController;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub controller: RolloutController,
}

/// Build the complete API router.
pub fn build_router(controller: RolloutController) -> Router {
    let api_state = ApiState { controller };

    let api_routes = Router::new()
        .route(
            "/rollouts",
            get(handlers::list_rollouts).post(handlers::submit_rollouts),
        )
        .route("/rollouts/{id}", get(handlers::get_rollout))
        .route("/rollouts/{id}/resume", post(handlers::resume_rollout))
        .route("/rollouts/{id}/pause", post(handlers::pause_rollout))
        .route("/rollouts/{id}/abort", post(handlers::abort_rollout))
        .route("/rollouts/{id}/history", get(handlers::rollout_history))
        .route("/rollouts/{id}/revisions", get(handlers::list_revisions))
        .route("/rollouts/{id}/traffic", get(handlers::get_traffic))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(api_state))
}
