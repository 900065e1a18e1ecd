use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::hint::HintLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Only set on assistant replies produced under a specific hint level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_level: Option<HintLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_typing: Option<bool>,
}

/// Partial update applied by [`ConversationLog::update`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub is_typing: Option<bool>,
}

/// Append-only, ordered record of one dialogue. Entries are never removed
/// individually; `clear` drops the whole dialogue when a new task starts.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps a fresh id and timestamp and appends to the end.
    pub fn append(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        hint_level: Option<HintLevel>,
    ) -> &Message {
        self.messages.push(Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            hint_level,
            is_typing: None,
        });
        // just pushed
        &self.messages[self.messages.len() - 1]
    }

    pub fn update(&mut self, id: &str, update: MessageUpdate) -> Option<&Message> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        if let Some(content) = update.content {
            message.content = content;
        }
        if let Some(is_typing) = update.is_typing {
            message.is_typing = Some(is_typing);
        }
        Some(message)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
