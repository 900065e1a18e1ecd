mod common;

use axum::http::StatusCode;
use std::sync::Arc;

use common::{
    create_session, create_test_app, create_test_app_with, derivative_task, send, set_task,
    ScriptedBackend, UnavailableProgressStore,
};

#[tokio::test]
async fn test_hint_levels_endpoint_lists_ladder() {
    let app = create_test_app(ScriptedBackend::replying("ok"));

    let (status, json) = send(&app.router, "GET", "/api/v1/hint-levels", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["max_level"], 4);
    let levels = json["levels"].as_array().unwrap();
    assert_eq!(levels.len(), 5);
    assert_eq!(levels[0]["label"], "Start");
    assert_eq!(levels[4]["label"], "Krok po kroku");
}

#[tokio::test]
async fn test_hint_ladder_stops_at_highest_level() {
    let app = create_test_app(ScriptedBackend::replying("ok"));
    let session_id = create_session(&app.router, "hint-learner").await;
    set_task(&app.router, &session_id, derivative_task()).await;
    let uri = format!("/api/v1/sessions/{}/hints", session_id);

    for expected in 1..=4 {
        let (status, json) = send(&app.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK, "{}", json);
        assert_eq!(json["advanced"], true);
        assert_eq!(json["hint_level"], expected);
        assert_eq!(json["hints_used_total"], expected);
        assert_eq!(json["announcement"]["role"], "system");
    }

    let (status, json) = send(&app.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["advanced"], false);
    assert_eq!(json["hint_level"], 4);
    assert_eq!(json["label"], "Krok po kroku");
    assert_eq!(json["hints_used_total"], 4);
    assert!(json.get("announcement").is_none());

    let (_, progress) = send(
        &app.router,
        "GET",
        "/api/v1/learners/hint-learner/progress",
        None,
    )
    .await;
    assert_eq!(progress["total_hints_used"], 4);
}

#[tokio::test]
async fn test_hint_announcement_names_new_level() {
    let app = create_test_app(ScriptedBackend::replying("ok"));
    let session_id = create_session(&app.router, "anna").await;
    set_task(&app.router, &session_id, derivative_task()).await;

    let (_, json) = send(
        &app.router,
        "POST",
        &format!("/api/v1/sessions/{}/hints", session_id),
        None,
    )
    .await;

    assert_eq!(
        json["announcement"]["content"],
        "🎯 Przechodzimy na poziom wskazówki: Ogólne pytanie"
    );
}

#[tokio::test]
async fn test_hint_for_unknown_session_returns_404() {
    let app = create_test_app(ScriptedBackend::replying("ok"));

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/sessions/missing/hints",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_hint_advances_while_progress_store_is_down() {
    let app = create_test_app_with(
        ScriptedBackend::replying("ok"),
        Arc::new(UnavailableProgressStore),
        |_| {},
    );
    let session_id = create_session(&app.router, "offline").await;
    let (status, _) = set_task(&app.router, &session_id, derivative_task()).await;
    assert_eq!(status, StatusCode::OK);
    let uri = format!("/api/v1/sessions/{}/hints", session_id);

    let (status, json) = send(&app.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    assert_eq!(json["advanced"], true);
    assert_eq!(json["hint_level"], 1);
    assert!(json.get("hints_used_total").is_none());

    let (_, session) = send(
        &app.router,
        "GET",
        &format!("/api/v1/sessions/{}", session_id),
        None,
    )
    .await;
    assert_eq!(session["hint_level"], 1);
    assert_eq!(session["messages"].as_array().unwrap().len(), 2);

    // the top rung is a no-op, not a failure
    for _ in 0..4 {
        let (status, _) = send(&app.router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, json) = send(&app.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["advanced"], false);
    assert_eq!(json["hint_level"], 4);
}
