//! The heartbeat cycle: deliver completed tasks, then nudge stalled
//! sessions. Not reentrant — a second caller while a cycle runs gets an
//! error report instead of a second cycle.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {
    anyhow::Result,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{
    classify::sounds_like_pending_work,
    prompts::{follow_up_prompt, task_completion_prompt},
    sentinel::strip_sentinel,
    store::HeartbeatStore,
    types::{ConversationMessage, HeartbeatReport, NewTask, PendingTask, Role},
};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One model invocation on behalf of a session.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user_id: String,
    pub session_id: String,
    pub channel: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub model: String,
}

/// Callback that runs a model turn. The gateway wires this to the AI
/// dispatcher; tests use canned closures.
pub type ChatFn =
    Arc<dyn Fn(ChatTurn) -> Pin<Box<dyn Future<Output = Result<ChatReply>> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Completed tasks considered per cycle.
    pub max_tasks_per_run: usize,
    /// Proactive messages allowed per session per rolling hour.
    pub max_follow_ups_per_hour: usize,
    /// Minimum gap since the previous proactive message in a session.
    pub dedup_window_ms: i64,
    /// How far back the follow-up sweep reads conversation history.
    pub recent_window_ms: i64,
    /// Message fetch cap for the follow-up sweep.
    pub recent_limit: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_run: 10,
            max_follow_ups_per_hour: 3,
            dedup_window_ms: 24 * 60 * 60 * 1000,
            recent_window_ms: 60 * 60 * 1000,
            recent_limit: 100,
        }
    }
}

pub struct HeartbeatEngine {
    store: Arc<dyn HeartbeatStore>,
    chat: ChatFn,
    config: HeartbeatConfig,
    running: Mutex<()>,
}

impl HeartbeatEngine {
    #[must_use]
    pub fn new(store: Arc<dyn HeartbeatStore>, chat: ChatFn, config: HeartbeatConfig) -> Self {
        Self {
            store,
            chat,
            config,
            running: Mutex::new(()),
        }
    }

    /// Expose task creation for other subsystems (and the model's tools).
    pub async fn create_pending_task(&self, task: NewTask) -> Result<String> {
        self.store.create_task(task).await
    }

    /// Transition a task to completed; the next cycle delivers it.
    pub async fn complete_task(&self, id: &str, result: Option<String>) -> Result<()> {
        self.store.complete_task(id, result).await
    }

    /// Run one cycle. Overlapping calls refuse rather than queue.
    pub async fn run(&self) -> HeartbeatReport {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("heartbeat cycle refused: previous cycle still running");
            return HeartbeatReport::already_running();
        };

        let mut report = HeartbeatReport::default();
        self.deliver_completed_tasks(&mut report).await;
        self.emit_follow_ups(&mut report).await;

        info!(
            processed = report.processed,
            delivered = report.delivered,
            skipped = report.skipped,
            errors = report.errors.len(),
            "heartbeat cycle finished"
        );
        report
    }

    // ── Sweep 1: completed-task delivery ─────────────────────────────────

    async fn deliver_completed_tasks(&self, report: &mut HeartbeatReport) {
        let tasks = match self
            .store
            .undelivered_completed_tasks(self.config.max_tasks_per_run)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                report.errors.push(format!("task query failed: {e}"));
                return;
            },
        };

        for task in tasks {
            report.processed += 1;
            if let Err(e) = self.deliver_task(&task, report).await {
                // The task stays undelivered; the next cycle retries it.
                report.errors.push(format!("task {}: {e}", task.id));
            }
        }
    }

    async fn deliver_task(&self, task: &PendingTask, report: &mut HeartbeatReport) -> Result<()> {
        let turn = ChatTurn {
            user_id: task.user_id.clone(),
            session_id: task.session_id.clone(),
            channel: task.channel.clone(),
            prompt: task_completion_prompt(task),
        };
        let reply = (self.chat)(turn).await?;

        let stripped = strip_sentinel(&reply.text);
        if stripped.suppress {
            debug!(task = %task.id, "task reply suppressed by sentinel");
            report.skipped += 1;
        } else {
            self.store
                .append_assistant_message(ConversationMessage {
                    user_id: task.user_id.clone(),
                    session_id: task.session_id.clone(),
                    role: Role::Assistant,
                    content: stripped.text,
                    channel: task.channel.clone(),
                    model: format!("heartbeat/{}", reply.model),
                    category: "proactive".into(),
                    created_at: now_ms(),
                })
                .await?;
            report.delivered += 1;
        }

        // Either way the task has been considered.
        self.store.mark_delivered(&task.id).await?;
        Ok(())
    }

    // ── Sweep 2: session follow-ups ──────────────────────────────────────

    async fn emit_follow_ups(&self, report: &mut HeartbeatReport) {
        let now = now_ms();
        let since = now - self.config.recent_window_ms;
        let messages = match self.store.recent_messages(since, self.config.recent_limit).await {
            Ok(messages) => messages,
            Err(e) => {
                report.errors.push(format!("message query failed: {e}"));
                return;
            },
        };

        for (key, view) in group_sessions(&messages) {
            let Some(candidate) = qualify(&view, now, &self.config) else {
                continue;
            };

            // Cross-window dedup: the fetched hour cannot see older
            // proactive messages, so ask the store directly.
            match self.store.last_proactive_at(&key.0, &key.1).await {
                Ok(Some(ts)) if now - ts < self.config.dedup_window_ms => continue,
                Ok(_) => {},
                Err(e) => {
                    report.errors.push(format!("session {}/{}: {e}", key.0, key.1));
                    continue;
                },
            }

            report.processed += 1;
            if let Err(e) = self.follow_up(&key.0, &key.1, candidate, report).await {
                report.errors.push(format!("session {}/{}: {e}", key.0, key.1));
            }
        }
    }

    async fn follow_up(
        &self,
        user_id: &str,
        session_id: &str,
        candidate: FollowUpCandidate<'_>,
        report: &mut HeartbeatReport,
    ) -> Result<()> {
        let turn = ChatTurn {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            channel: candidate.channel.to_string(),
            prompt: follow_up_prompt(candidate.last_user, candidate.last_assistant),
        };
        let reply = (self.chat)(turn).await?;

        let stripped = strip_sentinel(&reply.text);
        if stripped.suppress {
            debug!(session = session_id, "follow-up suppressed by sentinel");
            report.skipped += 1;
            return Ok(());
        }

        self.store
            .append_assistant_message(ConversationMessage {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                role: Role::Assistant,
                content: stripped.text,
                channel: candidate.channel.to_string(),
                model: format!("heartbeat/{}", reply.model),
                category: "proactive".into(),
                created_at: now_ms(),
            })
            .await?;
        report.delivered += 1;
        Ok(())
    }
}

struct SessionView<'a> {
    last_user: Option<&'a ConversationMessage>,
    last_assistant: Option<&'a ConversationMessage>,
    proactive_count: usize,
}

struct FollowUpCandidate<'a> {
    last_user: &'a str,
    last_assistant: &'a str,
    channel: &'a str,
}

fn group_sessions(
    messages: &[ConversationMessage],
) -> HashMap<(String, String), SessionView<'_>> {
    let mut sessions: HashMap<(String, String), SessionView<'_>> = HashMap::new();
    for msg in messages {
        let view = sessions
            .entry((msg.user_id.clone(), msg.session_id.clone()))
            .or_insert(SessionView {
                last_user: None,
                last_assistant: None,
                proactive_count: 0,
            });
        match msg.role {
            Role::User => {
                if view.last_user.is_none_or(|m| msg.created_at >= m.created_at) {
                    view.last_user = Some(msg);
                }
            },
            Role::Assistant => {
                if view
                    .last_assistant
                    .is_none_or(|m| msg.created_at >= m.created_at)
                {
                    view.last_assistant = Some(msg);
                }
                if msg.category == "proactive" {
                    view.proactive_count += 1;
                }
            },
        }
    }
    sessions
}

/// The in-window part of the qualification predicate. The cross-window
/// dedup check happens against the store afterwards.
fn qualify<'a>(
    view: &SessionView<'a>,
    now: i64,
    config: &HeartbeatConfig,
) -> Option<FollowUpCandidate<'a>> {
    let last_user = view.last_user?;
    let last_assistant = view.last_assistant?;

    // The user must not be waiting on a reply right now.
    if last_assistant.created_at < last_user.created_at {
        return None;
    }
    if now - last_assistant.created_at > config.recent_window_ms {
        return None;
    }
    if !sounds_like_pending_work(&last_assistant.content) {
        return None;
    }
    if view.proactive_count >= config.max_follow_ups_per_hour {
        return None;
    }

    Some(FollowUpCandidate {
        last_user: &last_user.content,
        last_assistant: &last_assistant.content,
        channel: &last_assistant.channel,
    })
}
