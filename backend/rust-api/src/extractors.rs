use axum::extract::{rejection::JsonRejection, FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::handlers::ApiError;

/// `Json` whose rejections surface as [`ApiError::BadRequest`], so malformed
/// bodies share the error shape of every other failure.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(reject)?;
        Ok(AppJson(value))
    }
}

fn reject(rejection: JsonRejection) -> ApiError {
    let reason = match &rejection {
        JsonRejection::MissingJsonContentType(_) => "expected Content-Type: application/json",
        JsonRejection::JsonSyntaxError(_) => "malformed JSON",
        JsonRejection::JsonDataError(_) => "unexpected JSON shape",
        _ => "unreadable body",
    };
    tracing::warn!("Rejected request body ({}): {}", reason, rejection.body_text());
    ApiError::bad_request(format!("Invalid request body: {}", rejection.body_text()))
}
