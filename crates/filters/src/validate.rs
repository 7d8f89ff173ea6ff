use std::sync::LazyLock;

use {regex::Regex, serde::Serialize};

/// Hard cap on inbound message length, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// Threat kinds recognised by the validator, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Threat {
    SqlInjection,
    NosqlInjection,
    CommandInjection,
    PathTraversal,
    CrossSiteScript,
    MessageTooLong,
}

impl Threat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::NosqlInjection => "nosql_injection",
            Self::CommandInjection => "command_injection",
            Self::PathTraversal => "path_traversal",
            Self::CrossSiteScript => "cross_site_script",
            Self::MessageTooLong => "message_too_long",
        }
    }

    /// Whether this threat alone justifies blocking the message.
    ///
    /// Over-length messages are truncated and processed; everything else is
    /// an injection signature and gets a blocking reply.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        !matches!(self, Self::MessageTooLong)
    }
}

/// Result of [`validate_input`].
#[derive(Debug, Clone)]
pub struct Validation {
    /// True iff no threats were found.
    pub safe: bool,
    pub threats: Vec<Threat>,
    /// NUL-stripped, length-capped, whitespace-trimmed text. Always
    /// produced, whether or not the input was safe.
    pub sanitized: String,
}

impl Validation {
    /// True iff any threat other than the length overrun is present.
    #[must_use]
    pub fn has_blocking_threat(&self) -> bool {
        self.threats.iter().any(|t| t.is_blocking())
    }
}

static THREAT_RULES: LazyLock<Vec<(Regex, Threat)>> = LazyLock::new(|| {
    [
        (
            r"(?i)(\b(union\s+select|select\s+.+\s+from|insert\s+into|delete\s+from|drop\s+(table|database)|truncate\s+table|alter\s+table)\b|;\s*--|'\s*(or|and)\s+['0-9]|\bor\s+1\s*=\s*1\b)",
            Threat::SqlInjection,
        ),
        (
            r#"(?i)\$(where|ne|gt|lt|gte|lte|regex|nin|in|or|and|not|exists)\s*["':]"#,
            Threat::NosqlInjection,
        ),
        (
            r"(?i)([;&|]\s*(rm|cat|wget|curl|bash|sh|nc|chmod|chown|kill|mkfs)\b|\$\([^)]*\)|`[^`]+`)",
            Threat::CommandInjection,
        ),
        (r"(?i)(\.\./|\.\.\\|%2e%2e%2f|%2e%2e/|\.\.%2f)", Threat::PathTraversal),
        (
            r"(?i)(<\s*script\b|javascript\s*:|\bon(error|load|click|mouseover|focus)\s*=|<\s*iframe\b)",
            Threat::CrossSiteScript,
        ),
    ]
    .into_iter()
    .map(|(pattern, threat)| {
        #[allow(clippy::expect_used)]
        (Regex::new(pattern).expect("threat pattern must compile"), threat)
    })
    .collect()
});

/// Validate an inbound message.
///
/// Evaluates the length cap and the ordered injection ruleset, then
/// sanitizes: NUL bytes removed, text truncated to [`MAX_MESSAGE_LENGTH`]
/// characters, whitespace trimmed. Sanitization runs regardless of safety so
/// the caller can still use the text for over-length inputs.
pub fn validate_input(text: &str) -> Validation {
    let mut threats = Vec::new();

    if text.chars().count() > MAX_MESSAGE_LENGTH {
        threats.push(Threat::MessageTooLong);
    }

    for (pattern, threat) in THREAT_RULES.iter() {
        if pattern.is_match(text) {
            threats.push(*threat);
        }
    }

    let without_nul: String = text.chars().filter(|c| *c != '\0').collect();
    let truncated: String = without_nul.chars().take(MAX_MESSAGE_LENGTH).collect();
    let sanitized = truncated.trim().to_string();

    Validation {
        safe: threats.is_empty(),
        threats,
        sanitized,
    }
}
