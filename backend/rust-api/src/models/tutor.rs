//! Wire types of the stateless tutor endpoint (`POST /api/sokrates`).
//!
//! Field names are camelCase to stay compatible with existing web clients.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::message::{Message, MessageRole};
use super::task::Task;

/// The slice of a task the prompt needs. Clients send the whole task record;
/// unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "scalar_as_text")]
    pub answer: Option<String>,
    #[serde(default, deserialize_with = "scalar_as_text")]
    pub solution: Option<String>,
}

/// Math answers often arrive as bare numbers (`"answer": 4`); any non-null
/// value is kept as its text form.
fn scalar_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

impl From<&Task> for TaskContext {
    fn from(task: &Task) -> Self {
        TaskContext {
            content: task.content.clone(),
            answer: task.answer.clone(),
            solution: task.solution.clone(),
        }
    }
}

/// A prior conversation entry as the client sends it. Only role and content
/// are read; the role is kept as free text and flattened later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        TranscriptEntry {
            role: role.to_string(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SokratesRequest {
    #[serde(default)]
    pub task: Option<TaskContext>,
    #[serde(default)]
    pub messages: Vec<TranscriptEntry>,
    #[serde(default)]
    pub user_message: Option<String>,
    /// Any JSON number; fractional levels round down before clamping.
    #[serde(default)]
    pub hint_level: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SokratesResponse {
    pub response: String,
}
