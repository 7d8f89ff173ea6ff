//! Sentinel token handling.
//!
//! The proactive prompts instruct the model to answer with `HEARTBEAT_OK`
//! when it has nothing meaningful to say. Models wrap the token in bold
//! markup often enough that the stripper has to tolerate `**HEARTBEAT_OK**`
//! and `<b>HEARTBEAT_OK</b>`, in any case, anywhere in the reply.

use std::sync::LazyLock;

use regex::Regex;

/// The token a model returns when there is nothing worth delivering.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Replies shorter than this after stripping are suppressed.
pub const MIN_MEANINGFUL_CHARS: usize = 20;

static SENTINEL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?i)(\*\*\s*HEARTBEAT_OK\s*\*\*|<b>\s*HEARTBEAT_OK\s*</b>|HEARTBEAT_OK)")
        .expect("sentinel pattern must compile")
});

/// Result of stripping the sentinel from a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripResult {
    /// True when the remaining text is too short to deliver.
    pub suppress: bool,
    pub text: String,
}

/// Remove every occurrence of the sentinel (with or without markup
/// wrappers), trim, and decide whether anything deliverable remains.
#[must_use]
pub fn strip_sentinel(reply: &str) -> StripResult {
    let stripped = SENTINEL.replace_all(reply, "");
    let text = stripped.trim().to_string();
    let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
    StripResult {
        suppress: meaningful < MIN_MEANINGFUL_CHARS,
        text,
    }
}
