//! Prompt construction for the two proactive sweeps.
//!
//! The sentinel contract is part of every prompt: the model is told to
//! answer `HEARTBEAT_OK` when there is nothing meaningful to report, and the
//! engine strips and suppresses accordingly.

use crate::{sentinel::HEARTBEAT_OK, types::PendingTask};

/// Longest slice of captured context quoted into a prompt.
const CONTEXT_SLICE_CHARS: usize = 300;

/// Longest slice of a conversation message quoted into a follow-up prompt.
const MESSAGE_SLICE_CHARS: usize = 200;

fn slice(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Prompt for delivering a completed task's result.
#[must_use]
pub fn task_completion_prompt(task: &PendingTask) -> String {
    let result = task.result.as_deref().unwrap_or("the task finished successfully");
    format!(
        "A background task you started for this user has completed.\n\
         Task: {description}\n\
         Result: {result}\n\
         Original context: {context}\n\n\
         Tell the user about the outcome naturally, in the language of the \
         conversation. If there is nothing meaningful to report, reply with \
         exactly {HEARTBEAT_OK} and nothing else.",
        description = task.description,
        context = slice(&task.context, CONTEXT_SLICE_CHARS),
    )
}

/// Prompt for a session follow-up nudge.
#[must_use]
pub fn follow_up_prompt(last_user: &str, last_assistant: &str) -> String {
    format!(
        "You previously told this user you would work on something. Their \
         last message was: \"{user}\"\n\
         Your last reply was: \"{assistant}\"\n\n\
         If you now have something useful to add — progress, a result, or a \
         next step — write a brief, natural check-in in the same language as \
         the conversation. If there is nothing meaningful to add yet, reply \
         with exactly {HEARTBEAT_OK} and nothing else.",
        user = slice(last_user, MESSAGE_SLICE_CHARS),
        assistant = slice(last_assistant, MESSAGE_SLICE_CHARS),
    )
}
