//! In-memory store: the test double, and the single-node default when no
//! external store is wired.

use {anyhow::Result, async_trait::async_trait, tokio::sync::RwLock};

use crate::{
    store::HeartbeatStore,
    types::{ConversationMessage, NewTask, PendingTask, Role, TaskStatus},
};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Default)]
pub struct MemoryHeartbeatStore {
    tasks: RwLock<Vec<PendingTask>>,
    messages: RwLock<Vec<ConversationMessage>>,
}

impl MemoryHeartbeatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: look up a task by id.
    pub async fn task(&self, id: &str) -> Option<PendingTask> {
        self.tasks.read().await.iter().find(|t| t.id == id).cloned()
    }

    /// Test helper: insert a message with explicit fields.
    pub async fn seed_message(&self, msg: ConversationMessage) {
        self.messages.write().await.push(msg);
    }

    /// Test helper: all stored messages.
    pub async fn messages(&self) -> Vec<ConversationMessage> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn create_task(&self, task: NewTask) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.tasks.write().await.push(PendingTask {
            id: id.clone(),
            user_id: task.user_id,
            session_id: task.session_id,
            channel: task.channel,
            task_type: task.task_type,
            description: task.description,
            status: TaskStatus::Pending,
            context: task.context,
            created_at: now_ms(),
            completed_at: None,
            result: None,
            delivered: false,
        });
        Ok(id)
    }

    async fn complete_task(&self, id: &str, result: Option<String>) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow::anyhow!("no such task: {id}"))?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now_ms());
        task.result = result;
        Ok(())
    }

    async fn undelivered_completed_tasks(&self, limit: usize) -> Result<Vec<PendingTask>> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<PendingTask> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && !t.delivered)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.completed_at.unwrap_or(t.created_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn mark_delivered(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
            task.delivered = true;
        }
        Ok(())
    }

    async fn recent_messages(&self, since_ms: i64, limit: usize) -> Result<Vec<ConversationMessage>> {
        let messages = self.messages.read().await;
        let mut out: Vec<ConversationMessage> = messages
            .iter()
            .filter(|m| m.created_at >= since_ms)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        if out.len() > limit {
            out.drain(..out.len() - limit);
        }
        Ok(out)
    }

    async fn append_assistant_message(&self, msg: ConversationMessage) -> Result<()> {
        self.messages.write().await.push(msg);
        Ok(())
    }

    async fn last_proactive_at(&self, user_id: &str, session_id: &str) -> Result<Option<i64>> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| {
                m.user_id == user_id
                    && m.session_id == session_id
                    && m.role == Role::Assistant
                    && m.category == "proactive"
            })
            .map(|m| m.created_at)
            .max())
    }
}
