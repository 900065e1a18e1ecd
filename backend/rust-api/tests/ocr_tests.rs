mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{create_test_app, ScriptedBackend};

const BOUNDARY: &str = "sokrates-test-boundary";

fn multipart_body(field: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n",
            b = BOUNDARY,
            field = field,
            file_name = file_name,
            content_type = content_type,
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/ocr")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_upload_returns_preview_without_engine() {
    let app = create_test_app(ScriptedBackend::replying("ok"));

    let response = app
        .router
        .clone()
        .oneshot(upload_request(multipart_body(
            "image",
            "zadanie.png",
            "image/png",
            &[1, 2, 3],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["file_name"], "zadanie.png");
    assert_eq!(json["mime_type"], "image/png");
    assert_eq!(json["size_bytes"], 3);
    assert_eq!(json["preview_data_url"], "data:image/png;base64,AQID");
    assert!(json["ocr_text"].is_null());
}

#[tokio::test]
async fn test_non_image_upload_is_rejected() {
    let app = create_test_app(ScriptedBackend::replying("ok"));

    let response = app
        .router
        .clone()
        .oneshot(upload_request(multipart_body(
            "image",
            "notatki.pdf",
            "application/pdf",
            b"%PDF-1.4",
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], 415);
}

#[tokio::test]
async fn test_missing_image_field_is_a_bad_request() {
    let app = create_test_app(ScriptedBackend::replying("ok"));

    let response = app
        .router
        .clone()
        .oneshot(upload_request(multipart_body(
            "attachment",
            "zadanie.png",
            "image/png",
            &[1],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
