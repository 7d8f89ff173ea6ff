//! Request signing and webhook signature verification.
//!
//! Two families of primitives live here:
//!
//! - the gateway → backend signed-request envelope
//!   (`<unix_seconds>:<hex_hmac_sha256>` with a freshness window), and
//! - per-platform webhook signature checks (hex with a configurable prefix,
//!   or raw base64).
//!
//! All secret comparisons go through [`timing_safe_eq`]: length inequality
//! short-circuits false (lengths are not secret), content comparison is
//! constant-time.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    base64::Engine,
    hmac::{Hmac, Mac},
    sha2::{Digest, Sha256},
};

type HmacSha256 = Hmac<Sha256>;

/// Default freshness window for signed requests (5 minutes).
pub const DEFAULT_MAX_AGE_MS: u64 = 300_000;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn hmac_hex(secret: &str, message: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(message.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Sign a payload for a backend call: `"<unix_seconds>:<hex_hmac>"` where the
/// MAC covers `"<unix_seconds>:<payload>"`.
pub fn sign_request(payload: &str, secret: &str) -> String {
    let ts = now_secs();
    let mac = hmac_hex(secret, &format!("{ts}:{payload}")).unwrap_or_default();
    format!("{ts}:{mac}")
}

/// Verify a token produced by [`sign_request`].
///
/// Returns false on malformed shape, unparseable or future timestamp, a
/// timestamp older than `max_age_ms`, or a MAC mismatch. Never panics.
pub fn verify_signed_request(token: &str, payload: &str, secret: &str, max_age_ms: u64) -> bool {
    let Some((ts_str, sig)) = token.split_once(':') else {
        return false;
    };
    let Ok(ts) = ts_str.parse::<u64>() else {
        return false;
    };

    let now = now_secs();
    if ts > now {
        return false;
    }
    if (now - ts) * 1000 > max_age_ms {
        return false;
    }

    let Some(expected) = hmac_hex(secret, &format!("{ts}:{payload}")) else {
        return false;
    };
    timing_safe_eq(expected.as_bytes(), sig.as_bytes())
}

/// Verify a hex HMAC-SHA256 webhook signature of `body`.
///
/// `prefix` is whatever the platform prepends to the hex digest (`"sha256="`,
/// `"v0="`, or empty).
pub fn verify_hmac_sha256(body: &str, signature: &str, secret: &str, prefix: &str) -> bool {
    let Some(expected) = hmac_hex(secret, body) else {
        return false;
    };
    let expected = format!("{prefix}{expected}");
    timing_safe_eq(expected.as_bytes(), signature.as_bytes())
}

/// Verify a raw-base64 HMAC-SHA256 webhook signature of `body`.
pub fn verify_hmac_sha256_base64(body: &str, signature: &str, secret: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    timing_safe_eq(expected.as_bytes(), signature.as_bytes())
}

/// Constant-time byte equality.
///
/// Unequal lengths short-circuit false; equal-length content comparison never
/// branches on the data.
#[must_use]
pub fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// One-way 12-hex-character tag for a user id, for log lines only.
///
/// A fixed process-wide key is fine here: the tag exists for log opacity,
/// not for security.
#[must_use]
pub fn audit_tag(user_id: &str) -> String {
    const LOG_KEY: &[u8] = b"omnigate-audit-v1";
    let mut hasher = Sha256::new();
    hasher.update(LOG_KEY);
    hasher.update(user_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn sign_then_verify_roundtrip() {
        let token = sign_request("payload", SECRET);
        assert!(verify_signed_request(&token, "payload", SECRET, DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn verify_rejects_wrong_payload() {
        let token = sign_request("payload", SECRET);
        assert!(!verify_signed_request(&token, "other", SECRET, DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let token = sign_request("payload", SECRET);
        assert!(!verify_signed_request(&token, "payload", "nope", DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn verify_rejects_malformed_token() {
        assert!(!verify_signed_request("garbage", "payload", SECRET, DEFAULT_MAX_AGE_MS));
        assert!(!verify_signed_request("", "payload", SECRET, DEFAULT_MAX_AGE_MS));
        assert!(!verify_signed_request("abc:def", "payload", SECRET, DEFAULT_MAX_AGE_MS));
    }

    /// A token issued 310 seconds ago must fail the 300-second window.
    #[test]
    fn verify_rejects_stale_timestamp() {
        let ts = now_secs() - 310;
        let mac = hmac_hex(SECRET, &format!("{ts}:payload")).unwrap();
        let token = format!("{ts}:{mac}");
        assert!(!verify_signed_request(&token, "payload", SECRET, DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn verify_rejects_future_timestamp() {
        let ts = now_secs() + 60;
        let mac = hmac_hex(SECRET, &format!("{ts}:payload")).unwrap();
        let token = format!("{ts}:{mac}");
        assert!(!verify_signed_request(&token, "payload", SECRET, DEFAULT_MAX_AGE_MS));
    }

    #[test]
    fn hex_signature_with_prefix() {
        let body = r#"{"hello":"world"}"#;
        let sig = format!("sha256={}", hmac_hex(SECRET, body).unwrap());
        assert!(verify_hmac_sha256(body, &sig, SECRET, "sha256="));
        assert!(!verify_hmac_sha256(body, &sig, SECRET, ""));
        assert!(!verify_hmac_sha256("tampered", &sig, SECRET, "sha256="));
    }

    #[test]
    fn base64_signature() {
        let body = "payload-bytes";
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let sig = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
        assert!(verify_hmac_sha256_base64(body, &sig, SECRET));
        assert!(!verify_hmac_sha256_base64(body, &sig, "other"));
    }

    #[test]
    fn timing_safe_eq_basics() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abd"));
        assert!(!timing_safe_eq(b"abc", b"abcd"));
        assert!(timing_safe_eq(b"", b""));
    }

    #[test]
    fn audit_tag_is_stable_and_short() {
        let a = audit_tag("user-123");
        let b = audit_tag("user-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, audit_tag("user-124"));
    }

    /// The raw user id must never be recoverable from (or equal to) its tag.
    #[test]
    fn security_audit_tag_is_not_the_user_id() {
        assert_ne!(audit_tag("377114917"), "377114917");
    }
}
