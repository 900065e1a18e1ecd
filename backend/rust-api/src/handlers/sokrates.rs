use axum::{body::Bytes, extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use super::ApiError;
use crate::models::hint::HintLevel;
use crate::models::tutor::{SokratesRequest, SokratesResponse};
use crate::services::tutor_service::{reply_or_fallback, TutorError};
use crate::services::AppState;

/// POST /api/sokrates
///
/// Stateless tutor turn: the client sends the task, the prior transcript,
/// the new message and the current hint level. The credential is checked
/// before the body is even parsed.
///
/// A `userMessage` made only of whitespace is rejected with 400 like a
/// missing one, so the model is never sent an empty learner turn.
pub async fn sokrates(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if !state.tutor.is_configured() {
        return Err(TutorError::Configuration("completion backend has no credential".to_string()).into());
    }

    let req: SokratesRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!("Rejecting malformed tutor request: {}", e);
        ApiError::from(TutorError::Validation(format!("malformed JSON body: {}", e)))
    })?;

    let (task, user_message) = match (req.task, req.user_message) {
        (Some(task), Some(user_message)) => (task, user_message),
        (task, user_message) => {
            return Err(TutorError::Validation(format!(
                "missing fields: task={}, userMessage={}",
                task.is_some(),
                user_message.is_some()
            ))
            .into())
        }
    };

    let hint_level = HintLevel::from_raw(req.hint_level.map_or(0, |level| level.floor() as i64));
    tracing::info!(
        "Stateless tutor request: hint_level={}, history={}",
        hint_level,
        req.messages.len()
    );

    let raw = state
        .tutor
        .respond(&task, &req.messages, &user_message, hint_level)
        .await?;

    Ok(Json(SokratesResponse {
        response: reply_or_fallback(&raw),
    }))
}
