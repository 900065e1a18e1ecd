use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;

pub use config::Config;
pub use services::AppState;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.allowed_origins);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .route("/api/sokrates", post(handlers::sokrates::sokrates))
        .nest("/api/v1", api_routes())
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hint-levels", get(handlers::progress::hint_levels))
        .nest("/sessions", sessions_routes())
        .route(
            "/learners/{id}/progress",
            get(handlers::progress::get_progress),
        )
        .route(
            "/learners/{id}/history",
            delete(handlers::progress::clear_history),
        )
        .route(
            "/ocr",
            post(handlers::ocr::upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route(
            "/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route("/{id}/task", put(handlers::sessions::set_task))
        .route("/{id}/messages", post(handlers::sessions::send_message))
        .route("/{id}/hints", post(handlers::sessions::request_hint))
        .route("/{id}/workspace", put(handlers::sessions::update_workspace))
        .route("/{id}/solved", post(handlers::sessions::mark_solved))
        .route("/{id}/stream", get(handlers::sse::session_stream))
}

/// Any origin unless `ALLOWED_ORIGINS` lists specific ones.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
