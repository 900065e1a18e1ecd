use serde::{Deserialize, Serialize};
use validator::Validate;

pub mod hint;
pub mod message;
pub mod ocr;
pub mod session;
pub mod task;
pub mod tutor;

use message::Message;
use task::TaskSummary;

pub const DEFAULT_LEARNER_ID: &str = "anonymous";

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 128))]
    pub learner_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Message must be 1-4000 characters"))]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub user_message: Message,
    /// `None` only when the task was replaced while the tutor was answering.
    pub assistant_message: Option<Message>,
    /// True when the tutor call failed and a fallback apology was recorded.
    pub fallback: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WorkspaceUpdateRequest {
    #[validate(length(max = 100000))]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SolvedResponse {
    pub solved_tasks: u64,
}

/// Durable per-learner progress. Conversations are never part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub learner_id: String,
    pub task_history: Vec<TaskSummary>,
    pub solved_tasks: u64,
    pub total_hints_used: u64,
}
