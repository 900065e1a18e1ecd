use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::TutorSettings;
use crate::metrics::{TUTOR_REQUESTS_TOTAL, TUTOR_REQUEST_DURATION_SECONDS};
use crate::models::hint::{HintLevel, HINT_LEVELS};
use crate::models::message::{Message, MessageRole};
use crate::models::session::{PendingTurn, SessionError, TutorSession};
use crate::models::tutor::{TaskContext, TranscriptEntry};
use crate::services::session_service::SharedSession;

pub const EMPTY_REPLY_FALLBACK: &str = "Przepraszam, nie mogę teraz odpowiedzieć.";
pub const ERROR_FALLBACK: &str = "Przepraszam, wystąpił błąd. Spróbuj ponownie.";
pub const ANSWER_UNKNOWN: &str = "Nieznana";
pub const SOLUTION_NONE: &str = "Brak";

/// Failure classes of a tutor request. `Display` is what clients see;
/// the inner detail is for logs only.
#[derive(Debug, Error)]
pub enum TutorError {
    #[error("Brak konfiguracji API")]
    Configuration(String),
    #[error("Brak wymaganych danych")]
    Validation(String),
    #[error("Wystąpił błąd podczas przetwarzania")]
    Processing(String),
}

impl TutorError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        match self {
            TutorError::Validation(_) => axum::http::StatusCode::BAD_REQUEST,
            TutorError::Configuration(_) | TutorError::Processing(_) => {
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            TutorError::Configuration(_) => "configuration_error",
            TutorError::Validation(_) => "validation_error",
            TutorError::Processing(_) => "processing_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// OpenAI-compatible chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// A language-model completion provider.
#[async_trait]
pub trait TutorBackend: Send + Sync {
    /// False when the credential is missing; checked before any call.
    fn is_configured(&self) -> bool;

    /// Returns the raw reply text, possibly empty.
    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, TutorError>;
}

pub struct OpenAiBackend {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(settings: &TutorSettings) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }
}

#[async_trait]
impl TutorBackend for OpenAiBackend {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, TutorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| TutorError::Configuration("OPENAI_API_KEY is not set".to_string()))?;

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(
            "Calling completion endpoint: {} model={} messages={}",
            url,
            request.model,
            request.messages.len()
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TutorError::Processing(format!("completion request timed out: {}", e))
                } else {
                    TutorError::Processing(format!("completion request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TutorError::Processing(format!(
                "completion provider returned {}: {}",
                status, error_text
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|e| {
            TutorError::Processing(format!("malformed completion response: {}", e))
        })?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default())
    }
}

/// Socratic system prompt. The known answer and solution live only here,
/// never in the learner-visible transcript.
pub fn build_system_prompt(task: &TaskContext, hint_level: HintLevel) -> String {
    let answer = task
        .answer
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or(ANSWER_UNKNOWN);
    let solution = task
        .solution
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(SOLUTION_NONE);

    let policies = HINT_LEVELS
        .iter()
        .map(|rung| format!("- {}: {}", rung.level, rung.policy))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Jesteś Sokratesem - mądrym nauczycielem matematyki używającym metody majeutycznej.

ZADANIE: {content}
Odpowiedź: {answer}
Rozwiązanie: {solution}

POZIOM WSKAZÓWKI: {level}
{policies}

ZASADY:
1. NIGDY nie podawaj gotowej odpowiedzi na początku
2. Zadawaj pytania naprowadzające
3. Buduj zrozumienie krok po kroku
4. Chwal za dobre myślenie
5. Używaj matematycznego formatu ($...$, $$...$$) gdy to pomaga
6. Bądź cierpliwy i wspierający"#,
        content = task.content,
        answer = answer,
        solution = solution,
        level = hint_level.value(),
        policies = policies,
    )
}

/// The model only distinguishes two speakers: `user` stays `user`, every
/// other role (assistant, system announcements, anything unknown) is sent
/// as `assistant`.
pub fn model_role(role: &str) -> ChatRole {
    if role == "user" {
        ChatRole::User
    } else {
        ChatRole::Assistant
    }
}

pub fn build_transcript(entries: &[TranscriptEntry]) -> Vec<ChatMessage> {
    entries
        .iter()
        .map(|entry| ChatMessage {
            role: model_role(&entry.role),
            content: entry.content.clone(),
        })
        .collect()
}

pub fn reply_or_fallback(raw: &str) -> String {
    if raw.trim().is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        raw.to_string()
    }
}

/// Result of one session round-trip.
#[derive(Debug)]
pub struct TurnOutcome {
    pub user_message: Message,
    pub assistant_message: Option<Message>,
    pub fallback: bool,
}

#[derive(Clone)]
pub struct TutorService {
    backend: Arc<dyn TutorBackend>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl TutorService {
    pub fn new(backend: Arc<dyn TutorBackend>, settings: &TutorSettings) -> Self {
        Self {
            backend,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_configured()
    }

    /// System prompt, then the flattened transcript, then the new user turn.
    pub fn build_chat_request(
        &self,
        task: &TaskContext,
        transcript: &[TranscriptEntry],
        user_message: &str,
        hint_level: HintLevel,
    ) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(transcript.len() + 2);
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: build_system_prompt(task, hint_level),
        });
        messages.extend(build_transcript(transcript));
        messages.push(ChatMessage {
            role: ChatRole::User,
            content: user_message.to_string(),
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// One tutor reply. Fails fast on a missing credential, makes at most
    /// one backend call and never retries. The returned text may be empty.
    pub async fn respond(
        &self,
        task: &TaskContext,
        transcript: &[TranscriptEntry],
        user_message: &str,
        hint_level: HintLevel,
    ) -> Result<String, TutorError> {
        let result = self
            .respond_inner(task, transcript, user_message, hint_level)
            .await;

        let outcome = match &result {
            Ok(text) if text.trim().is_empty() => "empty",
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        TUTOR_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();

        result
    }

    async fn respond_inner(
        &self,
        task: &TaskContext,
        transcript: &[TranscriptEntry],
        user_message: &str,
        hint_level: HintLevel,
    ) -> Result<String, TutorError> {
        if !self.backend.is_configured() {
            return Err(TutorError::Configuration(
                "completion backend has no credential".to_string(),
            ));
        }
        if user_message.trim().is_empty() {
            return Err(TutorError::Validation("userMessage is empty".to_string()));
        }

        let request = self.build_chat_request(task, transcript, user_message, hint_level);

        tracing::info!(
            "Requesting tutor reply: hint_level={}, transcript_len={}",
            hint_level,
            transcript.len()
        );

        let start = Instant::now();
        let result = self.backend.complete(&request).await;
        TUTOR_REQUEST_DURATION_SECONDS
            .with_label_values(&[if result.is_ok() { "success" } else { "error" }])
            .observe(start.elapsed().as_secs_f64());

        result
    }

    /// Full single-flight round-trip for a session. The backend call runs on
    /// its own task so the processing flag is released even if the caller
    /// goes away mid-request.
    pub async fn send_message(
        &self,
        session: &SharedSession,
        text: &str,
    ) -> Result<TurnOutcome, SessionError> {
        let turn = {
            let mut guard = session.lock().await;
            guard.begin_turn(text)?
        };

        let service = self.clone();
        let shared = session.clone();
        let worker_turn = turn.clone();
        let handle = tokio::spawn(async move {
            let transcript: Vec<TranscriptEntry> = worker_turn
                .transcript
                .iter()
                .map(TranscriptEntry::from)
                .collect();
            let context = TaskContext::from(&worker_turn.task);

            let result = service
                .respond(
                    &context,
                    &transcript,
                    &worker_turn.user_message.content,
                    worker_turn.hint_level,
                )
                .await;

            let mut guard = shared.lock().await;
            record_reply(&mut guard, &worker_turn, result)
        });

        match handle.await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!("Tutor worker for session failed: {}", e);
                let mut guard = session.lock().await;
                Ok(record_reply(
                    &mut guard,
                    &turn,
                    Err(TutorError::Processing(format!("tutor worker aborted: {}", e))),
                ))
            }
        }
    }
}

/// Response handler: appends the assistant reply (or a fixed apology) and
/// always releases the processing flag.
///
/// Model replies are tagged with the level captured when the request was
/// built. A reply for a task that has since been replaced is dropped.
pub fn record_reply(
    session: &mut TutorSession,
    turn: &PendingTurn,
    result: Result<String, TutorError>,
) -> TurnOutcome {
    if session.generation() != turn.generation {
        tracing::warn!(
            "Dropping tutor reply for session {}: task changed while waiting",
            session.id()
        );
        session.end_processing();
        return TurnOutcome {
            user_message: turn.user_message.clone(),
            assistant_message: None,
            fallback: result.is_err(),
        };
    }

    let (content, hint_level, fallback) = match result {
        Ok(raw) if raw.trim().is_empty() => {
            tracing::warn!("Tutor returned an empty reply for session {}", session.id());
            (reply_or_fallback(&raw), Some(turn.hint_level), true)
        }
        Ok(raw) => (raw, Some(turn.hint_level), false),
        Err(e) => {
            tracing::error!("Tutor request failed for session {}: {:?}", session.id(), e);
            (ERROR_FALLBACK.to_string(), None, true)
        }
    };

    let message = session.append_message(MessageRole::Assistant, content, hint_level);
    session.end_processing();

    TurnOutcome {
        user_message: turn.user_message.clone(),
        assistant_message: Some(message),
        fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{NewTaskRequest, Task};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CannedBackend {
        configured: bool,
        reply: Result<String, String>,
        calls: AtomicUsize,
        last_request: Mutex<Option<ChatCompletionRequest>>,
    }

    impl CannedBackend {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                configured: true,
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn failing(detail: &str) -> Arc<Self> {
            Arc::new(Self {
                configured: true,
                reply: Err(detail.to_string()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn unconfigured() -> Arc<Self> {
            Arc::new(Self {
                configured: false,
                reply: Ok("never".to_string()),
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TutorBackend for CannedBackend {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, TutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            self.reply.clone().map_err(TutorError::Processing)
        }
    }

    fn service(backend: Arc<CannedBackend>) -> TutorService {
        TutorService::new(backend, &TutorSettings::default())
    }

    fn derivative_task() -> TaskContext {
        TaskContext {
            content: "Oblicz pochodną funkcji f(x) = x^3".to_string(),
            answer: Some("3x^2".to_string()),
            solution: None,
        }
    }

    fn entry(role: &str, content: &str) -> TranscriptEntry {
        TranscriptEntry {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn system_prompt_embeds_task_level_and_sentinels() {
        let prompt = build_system_prompt(&derivative_task(), HintLevel::new(2).unwrap());
        assert!(prompt.contains("ZADANIE: Oblicz pochodną funkcji f(x) = x^3"));
        assert!(prompt.contains("Odpowiedź: 3x^2"));
        assert!(prompt.contains("Rozwiązanie: Brak"));
        assert!(prompt.contains("POZIOM WSKAZÓWKI: 2"));
        assert!(prompt.contains("- 4: Pełne rozwiązanie krok po kroku"));

        let unknown = build_system_prompt(&TaskContext::default(), HintLevel::START);
        assert!(unknown.contains("Odpowiedź: Nieznana"));
    }

    #[test]
    fn transcript_flattens_to_two_roles() {
        let transcript = build_transcript(&[
            entry("user", "a"),
            entry("assistant", "b"),
            entry("system", "c"),
            entry("", "d"),
        ]);
        let roles: Vec<ChatRole> = transcript.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                ChatRole::User,
                ChatRole::Assistant,
                ChatRole::Assistant,
                ChatRole::Assistant
            ]
        );
    }

    #[test]
    fn chat_request_orders_prompt_history_and_new_turn() {
        let svc = service(CannedBackend::replying("ok"));
        let request = svc.build_chat_request(
            &derivative_task(),
            &[entry("assistant", "Witaj!")],
            "Nie wiem jak zacząć",
            HintLevel::START,
        );

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, ChatRole::System);
        assert_eq!(request.messages[2].role, ChatRole::User);
        assert_eq!(request.messages[2].content, "Nie wiem jak zacząć");
        assert_eq!(request.temperature, 0.7);
        assert_eq!(request.max_tokens, 500);

        // the answer only appears in the system-side context
        assert!(request.messages[0].content.contains("3x^2"));
        assert!(request.messages[1..]
            .iter()
            .all(|m| !m.content.contains("3x^2")));
    }

    #[tokio::test]
    async fn missing_credential_fails_before_calling_backend() {
        let backend = CannedBackend::unconfigured();
        let svc = service(backend.clone());

        let err = svc
            .respond(&derivative_task(), &[], "Nie wiem", HintLevel::START)
            .await
            .unwrap_err();

        assert!(matches!(err, TutorError::Configuration(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_user_message_is_a_validation_error() {
        let backend = CannedBackend::replying("ok");
        let svc = service(backend.clone());
        let err = svc
            .respond(&derivative_task(), &[], "   ", HintLevel::START)
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::Validation(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    fn session_with_task() -> SharedSession {
        let mut session = TutorSession::new("anna");
        session.set_task(Task::from_request(NewTaskRequest {
            content: "Oblicz pochodną funkcji f(x) = x^3".to_string(),
            image_url: None,
            ocr_text: None,
            answer: Some("3x^2".to_string()),
            solution: None,
            subject: None,
            difficulty: None,
        }));
        Arc::new(tokio::sync::Mutex::new(session))
    }

    #[tokio::test]
    async fn send_message_records_tagged_reply_and_clears_flag() {
        let backend = CannedBackend::replying("Co wiesz o pochodnej potęgi?");
        let svc = service(backend.clone());
        let session = session_with_task();
        session.lock().await.request_hint().unwrap();

        let outcome = svc
            .send_message(&session, "Nie wiem jak zacząć")
            .await
            .unwrap();

        let reply = outcome.assistant_message.unwrap();
        assert!(!outcome.fallback);
        assert_eq!(reply.content, "Co wiesz o pochodnej potęgi?");
        assert_eq!(reply.hint_level, HintLevel::new(1));

        let guard = session.lock().await;
        assert!(!guard.is_processing());
        // system announcement, user turn, assistant reply
        assert_eq!(guard.messages().len(), 3);

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        // announcement was flattened to assistant
        assert_eq!(request.messages[1].role, ChatRole::Assistant);
        assert_eq!(request.messages.last().unwrap().content, "Nie wiem jak zacząć");
    }

    #[tokio::test]
    async fn backend_failure_appends_apology_and_clears_flag() {
        let backend = CannedBackend::failing("provider exploded");
        let svc = service(backend);
        let session = session_with_task();

        let outcome = svc.send_message(&session, "Pomocy").await.unwrap();

        assert!(outcome.fallback);
        assert_eq!(outcome.assistant_message.unwrap().content, ERROR_FALLBACK);
        let guard = session.lock().await;
        assert!(!guard.is_processing());
        assert_eq!(guard.messages().len(), 2);
    }

    #[tokio::test]
    async fn empty_reply_becomes_fixed_apology() {
        let svc = service(CannedBackend::replying("  "));
        let session = session_with_task();
        let outcome = svc.send_message(&session, "Pomocy").await.unwrap();
        let reply = outcome.assistant_message.unwrap();
        assert_eq!(reply.content, EMPTY_REPLY_FALLBACK);
        assert_eq!(reply.hint_level, Some(HintLevel::START));
    }

    #[tokio::test]
    async fn send_message_is_rejected_while_processing() {
        let svc = service(CannedBackend::replying("ok"));
        let session = session_with_task();
        session.lock().await.begin_processing().unwrap();

        let err = svc.send_message(&session, "Hej").await.unwrap_err();
        assert_eq!(err, SessionError::Busy);
        assert_eq!(session.lock().await.messages().len(), 0);
    }

    #[tokio::test]
    async fn reply_for_replaced_task_is_dropped() {
        let session = session_with_task();
        let turn = session.lock().await.begin_turn("Pierwsze pytanie").unwrap();

        let mut guard = session.lock().await;
        let next = guard.task().cloned().unwrap();
        guard.set_task(next);

        let outcome = record_reply(&mut guard, &turn, Ok("spóźniona odpowiedź".to_string()));
        assert!(outcome.assistant_message.is_none());
        assert!(!guard.is_processing());
        assert!(guard.messages().is_empty());
    }
}
