#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use sokrates_api::{
    config::{Config, TutorSettings},
    create_router,
    models::{task::TaskSummary, ProgressSnapshot},
    services::{
        ocr_service::OcrService,
        progress_store::{InMemoryProgressStore, ProgressStore},
        tutor_service::{ChatCompletionRequest, TutorBackend, TutorError},
        AppState,
    },
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tower::ServiceExt;

/// Completion backend with a fixed reply, optionally held until released.
pub struct ScriptedBackend {
    configured: bool,
    reply: Result<String, String>,
    gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedBackend {
    pub fn replying(text: &str) -> Self {
        Self {
            configured: true,
            reply: Ok(text.to_string()),
            gate: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            reply: Err(detail.to_string()),
            ..Self::replying("")
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::replying("never sent")
        }
    }

    /// Each call waits for `gate.notify_one()` before answering.
    pub fn gated(text: &str, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::replying(text)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatCompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TutorBackend for ScriptedBackend {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, TutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply.clone().map_err(TutorError::Processing)
    }
}

/// Progress store whose backend is permanently unreachable.
pub struct UnavailableProgressStore;

#[async_trait]
impl ProgressStore for UnavailableProgressStore {
    async fn add_task_to_history(&self, _learner_id: &str, _task: TaskSummary) -> anyhow::Result<()> {
        anyhow::bail!("progress store unavailable")
    }

    async fn history(&self, _learner_id: &str) -> anyhow::Result<Vec<TaskSummary>> {
        anyhow::bail!("progress store unavailable")
    }

    async fn clear_history(&self, _learner_id: &str) -> anyhow::Result<()> {
        anyhow::bail!("progress store unavailable")
    }

    async fn increment_solved(&self, _learner_id: &str) -> anyhow::Result<u64> {
        anyhow::bail!("progress store unavailable")
    }

    async fn increment_hints_used(&self, _learner_id: &str) -> anyhow::Result<u64> {
        anyhow::bail!("progress store unavailable")
    }

    async fn snapshot(&self, _learner_id: &str) -> anyhow::Result<ProgressSnapshot> {
        anyhow::bail!("progress store unavailable")
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        anyhow::bail!("progress store unavailable")
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub backend: Arc<ScriptedBackend>,
}

pub fn create_test_app(backend: ScriptedBackend) -> TestApp {
    create_test_app_with(backend, Arc::new(InMemoryProgressStore::new()), |_| {})
}

pub fn create_test_app_with(
    backend: ScriptedBackend,
    progress: Arc<dyn ProgressStore>,
    configure: impl FnOnce(&mut Config),
) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut config = Config {
        tutor: TutorSettings {
            api_key: Some("sk-test".to_string()),
            ..TutorSettings::default()
        },
        ..Config::default()
    };
    configure(&mut config);

    let backend = Arc::new(backend);
    let state = Arc::new(AppState::with_components(
        config,
        backend.clone(),
        progress,
        OcrService::default(),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        backend,
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}

pub async fn create_session(app: &Router, learner_id: &str) -> String {
    let (status, json) = send(
        app,
        "POST",
        "/api/v1/sessions",
        Some(serde_json::json!({ "learner_id": learner_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", json);
    json["id"].as_str().unwrap().to_string()
}

pub async fn set_task(app: &Router, session_id: &str, task: Value) -> (StatusCode, Value) {
    send(
        app,
        "PUT",
        &format!("/api/v1/sessions/{}/task", session_id),
        Some(task),
    )
    .await
}

pub fn derivative_task() -> Value {
    serde_json::json!({
        "content": "Oblicz pochodną funkcji $f(x) = x^3$",
        "answer": "3x^2",
        "solution": "f'(x) = 3x^2"
    })
}
