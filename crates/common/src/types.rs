use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A platform-neutral inbound message produced by a channel adapter.
///
/// Created once by the adapter, consumed once by the ingress pipeline, then
/// discarded. `meta` carries adapter-specific delivery hints (room id, reply
/// thread, space name) that travel through the pipeline untouched and come
/// back to the same adapter at egress time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Channel tag of the adapter that produced this message.
    pub channel: String,
    /// Opaque, channel-scoped sender id.
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Cleaned message text.
    pub text: String,
    /// Platform message id, when the platform has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Group / room / space id for non-DM messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Platform timestamp in unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Free-form delivery metadata preserved for the egress adapter.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl IncomingMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            text: text.into(),
            message_id: None,
            group_id: None,
            timestamp: None,
            meta: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Egress contract: produced by the pipeline, consumed by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryParams {
    pub recipient_id: String,
    pub text: String,
    /// Platform message id to reply to, when the platform supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Thread / group / room to deliver into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl DeliveryParams {
    pub fn new(recipient_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            text: text.into(),
            reply_to_id: None,
            thread_id: None,
            meta: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_survives_serde_roundtrip() {
        let msg = IncomingMessage::new("mattermost", "U1", "hello")
            .with_meta("channel_id", "C1")
            .with_meta("thread_root", "P9");
        let json = serde_json::to_string(&msg).unwrap();
        let back: IncomingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.meta.get("channel_id").map(String::as_str), Some("C1"));
        assert_eq!(back.meta.get("thread_root").map(String::as_str), Some("P9"));
    }

    #[test]
    fn missing_optional_fields_default() {
        let back: IncomingMessage =
            serde_json::from_str(r#"{"channel":"line","sender_id":"u","text":"hi"}"#).unwrap();
        assert!(back.meta.is_empty());
        assert!(back.group_id.is_none());
        assert!(back.timestamp.is_none());
    }
}
