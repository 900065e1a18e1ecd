use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::models::hint::{levels, HintLevelsResponse, MAX_HINT_LEVEL};
use crate::services::AppState;

/// GET /api/v1/hint-levels
pub async fn hint_levels() -> impl IntoResponse {
    Json(HintLevelsResponse {
        levels: levels(),
        max_level: MAX_HINT_LEVEL,
    })
}

/// GET /api/v1/learners/{id}/progress
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(learner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Getting progress for learner: {}", learner_id);

    let snapshot = state.progress.snapshot(&learner_id).await?;
    Ok(Json(snapshot))
}

/// DELETE /api/v1/learners/{id}/history
///
/// Counters are kept; only the task history is wiped.
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(learner_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Clearing task history for learner: {}", learner_id);

    state.progress.clear_history(&learner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
