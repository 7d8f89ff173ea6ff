//! Agent duplex protocol definitions.
//!
//! All communication with the enhanced-agent endpoint uses JSON frames over
//! one duplex connection.
//!
//! Frame types:
//! - `RequestFrame`  — gateway → agent RPC call
//! - `ResponseFrame` — agent → gateway RPC result
//! - `EventFrame`    — agent → gateway server-push
//!
//! Methods used: `connect`, `chat.send`. Events used: `chat` with payload
//! `{ state, delta?, message? }`.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_CHAT_SEND: &str = "chat.send";
pub const EVENT_CHAT: &str = "chat";

// ── Error shape ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// Gateway → agent RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub r#type: String, // always "req"
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl RequestFrame {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            r#type: "req".into(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Discriminated union of every frame the agent can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentFrame {
    #[serde(rename = "req")]
    Request(RequestFrameInner),
    #[serde(rename = "res")]
    Response(ResponseFrameInner),
    #[serde(rename = "event")]
    Event(EventFrameInner),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrameInner {
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrameInner {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrameInner {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

// ── Connect handshake ────────────────────────────────────────────────────────

/// Parameters for the initial `connect` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectParams {
    pub client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<ConnectAuth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectAuth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

// ── Chat ─────────────────────────────────────────────────────────────────────

/// Parameters for a `chat.send` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSendParams {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    pub message: String,
    /// Fresh UUID per call; the agent dedupes retries on it.
    #[serde(rename = "idempotencyKey")]
    pub idempotency_key: String,
    #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Streaming state carried on `chat` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatState {
    Streaming,
    Final,
    Error,
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEventPayload {
    pub state: ChatState,
    /// Incremental text to append to the running buffer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    /// Authoritative message; its content parts supersede accumulated deltas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<AssistantMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl AssistantMessage {
    /// Concatenate the text of all `text` content parts.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|p| p.r#type == "text")
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}
