use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // Tutor (language model) metrics
    pub static ref TUTOR_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tutor_requests_total",
        "Total number of tutor completion requests by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref TUTOR_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "tutor_request_duration_seconds",
        "Duration of completion backend calls in seconds",
        &["status"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]
    )
    .unwrap();

    // Session metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tutor_sessions_total",
        "Total number of tutoring sessions by lifecycle event",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "tutor_sessions_active",
        "Number of sessions currently held in memory"
    )
    .unwrap();

    pub static ref HINTS_REQUESTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "hints_requested_total",
        "Total number of hint level increases",
        &["hint_level"]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();

    // OCR metrics
    pub static ref OCR_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ocr_requests_total",
        "Total number of image uploads by OCR outcome",
        &["outcome"]
    )
    .unwrap();

    // Progress store metrics
    pub static ref PROGRESS_STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progress_store_operations_total",
        "Total number of progress store operations",
        &["operation", "status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a progress store operation
pub async fn track_store_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let result = future.await;
    let status = if result.is_ok() { "success" } else { "error" };

    PROGRESS_STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    result
}
