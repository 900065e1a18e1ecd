use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::hint::{HintLevel, MAX_HINT_LEVEL};
use super::message::{ConversationLog, Message, MessageRole, MessageUpdate};
use super::task::{Task, TaskSummary};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A tutor request is already in progress for this session")]
    Busy,
    #[error("No active task in this session")]
    NoActiveTask,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Session not found: {0}")]
    NotFound(String),
}

/// State change notifications, streamed to the UI over SSE.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    TaskSet {
        task: TaskSummary,
    },
    MessageAppended {
        message: Message,
    },
    MessageUpdated {
        message: Message,
    },
    HintLevelChanged {
        hint_level: HintLevel,
        label: &'static str,
    },
    ProcessingChanged {
        processing: bool,
    },
    WorkspaceUpdated {
        content: String,
    },
}

impl SessionEvent {
    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::TaskSet { .. } => "task-set",
            SessionEvent::MessageAppended { .. } => "message-appended",
            SessionEvent::MessageUpdated { .. } => "message-updated",
            SessionEvent::HintLevelChanged { .. } => "hint-level-changed",
            SessionEvent::ProcessingChanged { .. } => "processing-changed",
            SessionEvent::WorkspaceUpdated { .. } => "workspace-updated",
        }
    }
}

/// Everything captured when a tutor round-trip starts. The reply is matched
/// back to the session through `generation` and tagged with `hint_level`.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub generation: u64,
    pub hint_level: HintLevel,
    pub task: Task,
    /// Conversation before the new user message.
    pub transcript: Vec<Message>,
    pub user_message: Message,
}

/// One learner's tutoring session: the active task, its dialogue, the hint
/// ladder position and the single-flight processing flag.
#[derive(Debug)]
pub struct TutorSession {
    id: String,
    learner_id: String,
    task: Option<Task>,
    log: ConversationLog,
    hint_level: HintLevel,
    processing: bool,
    workspace_content: String,
    // bumped on every set_task so late replies for an old task are dropped
    generation: u64,
    created_at: DateTime<Utc>,
    events: broadcast::Sender<SessionEvent>,
}

impl TutorSession {
    pub fn new(learner_id: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.into(),
            task: None,
            log: ConversationLog::new(),
            hint_level: HintLevel::reset(),
            processing: false,
            workspace_content: String::new(),
            generation: 0,
            created_at: Utc::now(),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn task(&self) -> Option<&Task> {
        self.task.as_ref()
    }

    pub fn hint_level(&self) -> HintLevel {
        self.hint_level
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn workspace_content(&self) -> &str {
        &self.workspace_content
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Replaces the task, discards the previous dialogue and drops back to
    /// the first hint rung.
    pub fn set_task(&mut self, task: Task) {
        let summary = task.summary();
        self.task = Some(task);
        self.log.clear();
        self.hint_level = HintLevel::reset();
        self.generation += 1;

        tracing::debug!(
            "Session {} switched to task {} (generation {})",
            self.id,
            summary.id,
            self.generation
        );

        self.emit(SessionEvent::TaskSet { task: summary });
        self.emit(SessionEvent::HintLevelChanged {
            hint_level: self.hint_level,
            label: self.hint_level.info().label,
        });
    }

    pub fn append_message(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        hint_level: Option<HintLevel>,
    ) -> Message {
        let message = self.log.append(role, content, hint_level).clone();
        self.emit(SessionEvent::MessageAppended {
            message: message.clone(),
        });
        message
    }

    pub fn update_message(&mut self, id: &str, update: MessageUpdate) -> Option<Message> {
        let message = self.log.update(id, update)?.clone();
        self.emit(SessionEvent::MessageUpdated {
            message: message.clone(),
        });
        Some(message)
    }

    /// Opening question shown once a task is loaded.
    pub fn greet(&mut self) -> Option<Message> {
        let subject = self.task.as_ref()?.subject.clone();
        Some(self.append_message(
            MessageRole::Assistant,
            format!(
                "Witaj! Widzę, że masz zadanie z {}. Zanim zaczniemy, spójrz na nie uważnie. \
                 Co możesz mi powiedzieć o tym zadaniu? Co jest dane, a czego szukamy?",
                subject
            ),
            None,
        ))
    }

    /// Moves one rung up and announces it with a system message.
    ///
    /// At the top rung nothing changes and `Ok(None)` is returned. While a
    /// tutor call is in flight the request is rejected, so the level tagged
    /// on the pending reply always matches the level its prompt was built with.
    pub fn request_hint(&mut self) -> Result<Option<Message>, SessionError> {
        if self.processing {
            return Err(SessionError::Busy);
        }
        if self.hint_level.is_max() {
            return Ok(None);
        }

        self.hint_level = self.hint_level.advance();
        let info = self.hint_level.info();
        self.emit(SessionEvent::HintLevelChanged {
            hint_level: self.hint_level,
            label: info.label,
        });

        let announcement = self.append_message(
            MessageRole::System,
            format!("🎯 Przechodzimy na poziom wskazówki: {}", info.label),
            None,
        );
        Ok(Some(announcement))
    }

    pub fn begin_processing(&mut self) -> Result<(), SessionError> {
        if self.processing {
            return Err(SessionError::Busy);
        }
        self.processing = true;
        self.emit(SessionEvent::ProcessingChanged { processing: true });
        Ok(())
    }

    pub fn end_processing(&mut self) {
        if self.processing {
            self.processing = false;
            self.emit(SessionEvent::ProcessingChanged { processing: false });
        }
    }

    /// Validates and opens a tutor round-trip: claims the processing flag,
    /// captures the hint level and prior transcript, then appends the user's
    /// message.
    pub fn begin_turn(&mut self, user_text: &str) -> Result<PendingTurn, SessionError> {
        let text = user_text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let task = self.task.clone().ok_or(SessionError::NoActiveTask)?;

        self.begin_processing()?;

        let transcript = self.log.messages().to_vec();
        let hint_level = self.hint_level;
        let user_message = self.append_message(MessageRole::User, text, None);

        Ok(PendingTurn {
            generation: self.generation,
            hint_level,
            task,
            transcript,
            user_message,
        })
    }

    pub fn set_workspace_content(&mut self, content: impl Into<String>) {
        self.workspace_content = content.into();
        self.emit(SessionEvent::WorkspaceUpdated {
            content: self.workspace_content.clone(),
        });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let info = self.hint_level.info();
        SessionSnapshot {
            id: self.id.clone(),
            learner_id: self.learner_id.clone(),
            task: self.task.as_ref().map(Task::summary),
            hint_level: self.hint_level,
            hint_label: info.label,
            max_hint_level: MAX_HINT_LEVEL,
            messages: self.log.messages().to_vec(),
            is_processing: self.processing,
            workspace_content: self.workspace_content.clone(),
            created_at: self.created_at,
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is the normal case when no UI is attached.
        let _ = self.events.send(event);
    }
}

#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub learner_id: String,
    pub task: Option<TaskSummary>,
    pub hint_level: HintLevel,
    pub hint_label: &'static str,
    pub max_hint_level: u8,
    pub messages: Vec<Message>,
    pub is_processing: bool,
    pub workspace_content: String,
    pub created_at: DateTime<Utc>,
}
