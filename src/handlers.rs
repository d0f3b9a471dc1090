use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde_json::json;
use tracing::{error, info};

use crate::{
    error::ApiError,
    models::{SubmitRequest, SubmitResponse, Submission},
    state::AppState,
    websocket::handle_websocket,
};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Accept a submission for asynchronous moderation.
///
/// Phase 1 of the two-phase submit protocol: validate and enqueue, then
/// return immediately. Classification, persistence, and notification happen
/// later in the worker, connected to this call only by the submission id.
pub async fn post_submission(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let submission = Submission::from_request(&request).map_err(ApiError::Validation)?;

    let payload =
        serde_json::to_vec(&submission).map_err(|e| ApiError::Internal(e.to_string()))?;

    // No internal retry: a failed hand-off surfaces as 503 and the caller
    // resubmits.
    if let Err(e) = state.queue.publish(&payload).await {
        error!(error = %e, "failed to enqueue submission");
        return Err(ApiError::Unavailable("broker publish failed".to_string()));
    }

    state.metrics.increment_submissions().await;
    info!(submission_id = %submission.id, user_id = %submission.user_id, "submission accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            message: "Content submitted for moderation".to_string(),
            submission_id: submission.id,
        }),
    ))
}

/// Liveness probe: always 200, no dependency checks.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
