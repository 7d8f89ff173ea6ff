use std::sync::LazyLock;

use {regex::Regex, serde::Serialize};

/// Kinds of sensitive data the masker recognises, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    NationalId,
    CreditCard,
    Phone,
    ApiKey,
    Email,
    BankAccount,
}

impl SensitiveKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NationalId => "national_id",
            Self::CreditCard => "credit_card",
            Self::Phone => "phone",
            Self::ApiKey => "api_key",
            Self::Email => "email",
            Self::BankAccount => "bank_account",
        }
    }
}

/// Result of [`detect_and_mask`].
#[derive(Debug, Clone)]
pub struct Masking {
    pub detected: bool,
    pub types: Vec<SensitiveKind>,
    pub masked: String,
}

/// Ordered (pattern, kind, replacement literal) ruleset.
///
/// Order matters: the resident-registration pattern must run before the bank
/// account rule, and card numbers before phone numbers, so the broader
/// digit-group patterns never eat a narrower match. Replacement literals
/// contain no digits, which is what makes re-application a no-op.
static MASK_RULES: LazyLock<Vec<(Regex, SensitiveKind, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\b\d{6}-[1-4]\d{6}\b",
            SensitiveKind::NationalId,
            "******-*******",
        ),
        (
            r"\b\d{4}[- ]\d{4}[- ]\d{4}[- ]\d{4}\b",
            SensitiveKind::CreditCard,
            "****-****-****-****",
        ),
        (
            r"\b01[016789][- ]?\d{3,4}[- ]?\d{4}\b",
            SensitiveKind::Phone,
            "010-****-****",
        ),
        (
            r"\b(sk|pk|rk)[-_](live|test)?[-_]?[A-Za-z0-9]{16,}\b|\bapi[-_]?key\s*[:=]\s*\S{8,}",
            SensitiveKind::ApiKey,
            "[API_KEY]",
        ),
        (
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            SensitiveKind::Email,
            "***@***.***",
        ),
        (
            r"\b\d{3,6}-\d{2,6}-\d{6,}\b",
            SensitiveKind::BankAccount,
            "***-***-******",
        ),
    ]
    .into_iter()
    .map(|(pattern, kind, mask)| {
        #[allow(clippy::expect_used)]
        (Regex::new(pattern).expect("mask pattern must compile"), kind, mask)
    })
    .collect()
});

/// Replace sensitive data with fixed mask literals.
///
/// Returns the kinds found (each at most once, in rule order) and the masked
/// text. Idempotent: masking already-masked text changes nothing.
pub fn detect_and_mask(text: &str) -> Masking {
    let mut types = Vec::new();
    let mut masked = text.to_string();

    for (pattern, kind, replacement) in MASK_RULES.iter() {
        if pattern.is_match(&masked) {
            types.push(*kind);
            masked = pattern.replace_all(&masked, *replacement).into_owned();
        }
    }

    Masking {
        detected: !types.is_empty(),
        types,
        masked,
    }
}
