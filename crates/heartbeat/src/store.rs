use {anyhow::Result, async_trait::async_trait};

use crate::types::{ConversationMessage, NewTask, PendingTask};

/// Storage the heartbeat reads and writes.
///
/// The real store lives outside the gateway; the engine only needs these
/// operations and assumes single-row writes are linearizable, so the
/// `delivered` transition acts as the at-most-once barrier.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Insert a `pending` task and return its id.
    async fn create_task(&self, task: NewTask) -> Result<String>;

    /// Transition a task to `completed` with an optional result.
    async fn complete_task(&self, id: &str, result: Option<String>) -> Result<()>;

    /// Completed, not-yet-delivered tasks, oldest first, at most `limit`.
    async fn undelivered_completed_tasks(&self, limit: usize) -> Result<Vec<PendingTask>>;

    /// Flip a task's `delivered` flag to true.
    async fn mark_delivered(&self, id: &str) -> Result<()>;

    /// Conversation messages with `created_at >= since_ms`, newest last, at
    /// most `limit`.
    async fn recent_messages(&self, since_ms: i64, limit: usize) -> Result<Vec<ConversationMessage>>;

    /// Append an assistant message (the proactive output).
    async fn append_assistant_message(&self, msg: ConversationMessage) -> Result<()>;

    /// Timestamp of the most recent `proactive` message in a session, if any.
    async fn last_proactive_at(&self, user_id: &str, session_id: &str) -> Result<Option<i64>>;
}
