use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::services::{ocr_service::UploadedImage, AppState};

const IMAGE_FIELD: &str = "image";

/// POST /api/v1/ocr
///
/// Takes one image in the `image` multipart field and returns a data-URL
/// preview plus recognized text when an OCR engine is configured.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        tracing::info!(
            "Image uploaded: name={:?}, type={:?}, size={}",
            file_name,
            content_type,
            bytes.len()
        );

        let image = UploadedImage::from_parts(file_name, content_type.as_deref(), bytes.to_vec())?;
        let response = state.ocr.process(image).await;
        return Ok(Json(response));
    }

    Err(ApiError::bad_request(format!(
        "Missing multipart field '{}'",
        IMAGE_FIELD
    )))
}
