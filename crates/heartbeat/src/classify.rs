//! Pending-work classifier.
//!
//! A follow-up is only warranted when the assistant's last message sounds
//! like a promise of future work. The phrase list covers English and Korean;
//! adding a locale means appending to `PENDING_PHRASES`.

use std::sync::LazyLock;

use regex::Regex;

const PENDING_PHRASES: &[&str] = &[
    // English
    r"(?i)please wait",
    r"(?i)\bworking on\b",
    r"(?i)\bi['’]?ll check\b",
    r"(?i)\bi will check\b",
    r"(?i)\blet me check\b",
    r"(?i)\bi['’]?ll look into\b",
    r"(?i)\blooking into\b",
    r"(?i)\bin progress\b",
    r"(?i)\bhold on\b",
    r"(?i)\bone moment\b",
    r"(?i)\bget back to you\b",
    r"(?i)\bstill running\b",
    // Korean
    r"잠시만\s*기다려",
    r"기다려\s*주세요",
    r"확인해\s*(보겠습니다|볼게요|볼게)",
    r"확인\s*중",
    r"진행\s*중",
    r"작업\s*중",
    r"알아보겠습니다",
    r"알아볼게요",
];

static CLASSIFIER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PENDING_PHRASES
        .iter()
        .map(|pattern| {
            #[allow(clippy::expect_used)]
            Regex::new(pattern).expect("pending-work pattern must compile")
        })
        .collect()
});

/// True when the text reads like unfinished work the user is waiting on.
#[must_use]
pub fn sounds_like_pending_work(text: &str) -> bool {
    CLASSIFIER.iter().any(|re| re.is_match(text))
}
