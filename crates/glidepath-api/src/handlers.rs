//! REST API handlers.
//!
//! Each handler calls into the `RolloutController` and returns JSON
//! responses.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use glidepath_controller::ControllerError;
use glidepath_rollout::Rollout;
use glidepath_state::{Revision, RolloutState, StateError};
use glidepath_traffic::TrafficError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn status_for(err: &ControllerError) -> StatusCode {
    match err {
        ControllerError::NotFound(_) | ControllerError::Traffic(TrafficError::UnknownWorkload(_)) => {
            StatusCode::NOT_FOUND
        }
        ControllerError::Closed(_)
        | ControllerError::Engine(_)
        | ControllerError::State(StateError::Conflict(_)) => StatusCode::CONFLICT,
        ControllerError::Manifest(_) | ControllerError::Traffic(TrafficError::InvalidWeight(_)) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn controller_error(err: ControllerError) -> axum::response::Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    } else {
        debug!(error = %err, %status, "request rejected");
    }
    error_response(&err.to_string(), status)
}

/// Rollout status as served by the API.
#[derive(Debug, Serialize)]
pub struct RolloutStatus {
    #[serde(flatten)]
    pub state: RolloutState,
    /// Canary weight implied by the steps executed so far.
    pub canary_weight: u8,
}

impl From<RolloutState> for RolloutStatus {
    fn from(state: RolloutState) -> Self {
        let canary_weight = Rollout::from_state(state.clone()).current_weight();
        Self {
            state,
            canary_weight,
        }
    }
}

/// Revision summary; the full template is in the store.
#[derive(Debug, Serialize)]
pub struct RevisionSummary {
    pub generation: u64,
    pub template_hash: String,
    pub image: Option<String>,
    pub created_at_ms: u64,
}

impl From<&Revision> for RevisionSummary {
    fn from(rev: &Revision) -> Self {
        Self {
            generation: rev.generation,
            template_hash: rev.template_hash.clone(),
            image: rev.template.primary_image().map(str::to_string),
            created_at_ms: rev.created_at_ms,
        }
    }
}

/// Optional body of an abort request.
#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    pub reason: Option<String>,
}

// ── Rollouts ───────────────────────────────────────────────────

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.controller.list() {
        Ok(rollouts) => {
            let statuses: Vec<RolloutStatus> = rollouts.into_iter().map(Into::into).collect();
            ApiResponse::ok(statuses).into_response()
        }
        Err(e) => controller_error(e),
    }
}

/// POST /api/v1/rollouts
///
/// The body is one or more Rollout documents. JSON is accepted as well,
/// being valid YAML.
pub async fn submit_rollouts(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let Ok(text) = std::str::from_utf8(&body) else {
        return error_response("body is not valid UTF-8", StatusCode::BAD_REQUEST);
    };
    match state.controller.submit_documents(text).await {
        Ok(rollouts) if rollouts.is_empty() => {
            error_response("no Rollout documents in body", StatusCode::BAD_REQUEST)
        }
        Ok(rollouts) => {
            let statuses: Vec<RolloutStatus> = rollouts.into_iter().map(Into::into).collect();
            (StatusCode::CREATED, ApiResponse::ok(statuses)).into_response()
        }
        Err(e) => controller_error(e),
    }
}

/// GET /api/v1/rollouts/{id}
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.status(&id) {
        Ok(rollout) => ApiResponse::ok(RolloutStatus::from(rollout)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// POST /api/v1/rollouts/{id}/resume
pub async fn resume_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.resume(&id).await {
        Ok(rollout) => ApiResponse::ok(RolloutStatus::from(rollout)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// POST /api/v1/rollouts/{id}/pause
pub async fn pause_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.pause(&id).await {
        Ok(rollout) => ApiResponse::ok(RolloutStatus::from(rollout)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// POST /api/v1/rollouts/{id}/abort
pub async fn abort_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let request = if body.is_empty() {
        AbortRequest::default()
    } else {
        match serde_json::from_slice::<AbortRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return error_response(&format!("invalid abort request: {e}"), StatusCode::BAD_REQUEST);
            }
        }
    };
    let reason = request.reason.as_deref().unwrap_or("aborted by operator");
    match state.controller.abort(&id, reason).await {
        Ok(rollout) => ApiResponse::ok(RolloutStatus::from(rollout)).into_response(),
        Err(e) => controller_error(e),
    }
}

/// GET /api/v1/rollouts/{id}/history
pub async fn rollout_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.history(&id) {
        Ok(history) => {
            let statuses: Vec<RolloutStatus> = history.into_iter().map(Into::into).collect();
            ApiResponse::ok(statuses).into_response()
        }
        Err(e) => controller_error(e),
    }
}

/// GET /api/v1/rollouts/{id}/revisions
pub async fn list_revisions(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.revisions(&id) {
        Ok(revisions) => {
            let summaries: Vec<RevisionSummary> = revisions.iter().map(Into::into).collect();
            ApiResponse::ok(summaries).into_response()
        }
        Err(e) => controller_error(e),
    }
}

/// GET /api/v1/rollouts/{id}/traffic
pub async fn get_traffic(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.traffic(&id) {
        Ok(routing) => ApiResponse::ok(routing).into_response(),
        Err(e) => controller_error(e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let active = state.controller.active().await.len();
    ApiResponse::ok(serde_json::json!({ "status": "ok", "active_rollouts": active }))
}
