use serde::{Deserialize, Serialize};

/// What kind of work a pending task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AsyncAction,
    FollowUp,
    Reminder,
    ProactiveCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A background task awaiting proactive delivery.
///
/// `delivered` transitions false→true exactly once, in the cycle that
/// considers the task — whether or not a message was actually produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub channel: String,
    pub task_type: TaskType,
    pub description: String,
    pub status: TaskStatus,
    /// Conversation context captured when the task was created.
    pub context: String,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub result: Option<String>,
    pub delivered: bool,
}

/// Parameters for task creation.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub user_id: String,
    pub session_id: String,
    pub channel: String,
    pub task_type: TaskType,
    pub description: String,
    pub context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One stored conversation message, as the heartbeat reads and writes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub user_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub channel: String,
    pub model: String,
    pub category: String,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// Counters returned by one heartbeat cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HeartbeatReport {
    /// Tasks and sessions considered.
    pub processed: usize,
    /// Messages actually persisted.
    pub delivered: usize,
    /// Considered but suppressed (sentinel or too short).
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl HeartbeatReport {
    #[must_use]
    pub fn already_running() -> Self {
        Self {
            errors: vec!["cycle already running".into()],
            ..Self::default()
        }
    }
}
