use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::{
    extractors::AppJson,
    metrics::HINTS_REQUESTED_TOTAL,
    models::{
        hint::RequestHintResponse,
        task::{NewTaskRequest, Task},
        CreateSessionRequest, SendMessageRequest, SendMessageResponse, SolvedResponse,
        WorkspaceUpdateRequest, DEFAULT_LEARNER_ID,
    },
    services::AppState,
};

/// POST /api/v1/sessions
///
/// The body is optional; without one the session belongs to the anonymous
/// learner.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))?
    };
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let learner_id = req
        .learner_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_LEARNER_ID);
    tracing::info!("Creating session for learner_id={}", learner_id);

    let (_, session) = state.sessions.create(learner_id).await;
    let snapshot = session.lock().await.snapshot();

    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Getting session: {}", session_id);

    let session = state.sessions.get(&session_id).await?;
    let snapshot = session.lock().await.snapshot();
    Ok(Json(snapshot))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Ending session: {}", session_id);

    state.sessions.remove(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/sessions/{id}/task
///
/// Replaces the active task: clears the conversation, resets the hint
/// ladder, records the task in the learner's history and greets.
pub async fn set_task(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<NewTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let session = state.sessions.get(&session_id).await?;
    let task = Task::from_request(req);
    let summary = task.summary();
    tracing::info!(
        "Setting task {} for session {} (subject={})",
        task.id,
        session_id,
        task.subject
    );

    let (learner_id, snapshot) = {
        let mut guard = session.lock().await;
        guard.set_task(task);
        guard.greet();
        (guard.learner_id().to_string(), guard.snapshot())
    };

    // The session already moved on; a store outage must not undo that.
    if let Err(e) = state.progress.add_task_to_history(&learner_id, summary).await {
        tracing::error!("Failed to record task history for {}: {:?}", learner_id, e);
    }

    Ok(Json(snapshot))
}

/// POST /api/v1/sessions/{id}/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;
    tracing::info!("Sending message in session: {}", session_id);

    let session = state.sessions.get(&session_id).await?;
    let outcome = state.tutor.send_message(&session, &req.content).await?;

    Ok(Json(SendMessageResponse {
        user_message: outcome.user_message,
        assistant_message: outcome.assistant_message,
        fallback: outcome.fallback,
    }))
}

/// POST /api/v1/sessions/{id}/hints
pub async fn request_hint(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Requesting hint for session: {}", session_id);

    let session = state.sessions.get(&session_id).await?;
    let (learner_id, announcement, level) = {
        let mut guard = session.lock().await;
        let announcement = guard.request_hint()?;
        (guard.learner_id().to_string(), announcement, guard.hint_level())
    };

    let advanced = announcement.is_some();
    // The session already moved up a rung; the counter is best-effort.
    let hints_used_total = if advanced {
        HINTS_REQUESTED_TOTAL
            .with_label_values(&[&level.to_string()])
            .inc();
        state
            .progress
            .increment_hints_used(&learner_id)
            .await
            .map_err(|e| tracing::error!("Failed to count hint for {}: {:?}", learner_id, e))
            .ok()
    } else {
        tracing::debug!("Session {} already at the highest hint level", session_id);
        state
            .progress
            .snapshot(&learner_id)
            .await
            .map(|progress| progress.total_hints_used)
            .map_err(|e| tracing::error!("Failed to read progress for {}: {:?}", learner_id, e))
            .ok()
    };

    let info = level.info();
    Ok(Json(RequestHintResponse {
        advanced,
        hint_level: level.value(),
        label: info.label,
        description: info.description,
        announcement,
        hints_used_total,
    }))
}

pub async fn update_workspace(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<WorkspaceUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    let session = state.sessions.get(&session_id).await?;
    session.lock().await.set_workspace_content(req.content);

    Ok(Json(json!({ "updated": true })))
}

/// POST /api/v1/sessions/{id}/solved
pub async fn mark_solved(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.get(&session_id).await?;
    let learner_id = {
        let guard = session.lock().await;
        if guard.task().is_none() {
            return Err(ApiError::bad_request("No active task in this session"));
        }
        guard.learner_id().to_string()
    };

    let solved_tasks = state.progress.increment_solved(&learner_id).await?;
    tracing::info!("Learner {} solved a task (total {})", learner_id, solved_tasks);

    Ok(Json(SolvedResponse { solved_tasks }))
}
