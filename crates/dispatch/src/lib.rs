//! Two-tier AI dispatch.
//!
//! Tier 1 talks to the enhanced-agent endpoint over a duplex connection and
//! aggregates its streaming reply; any failure there falls through to
//! Tier 2, a signed REST call to the backend. The pipeline never retries
//! Tier 2 — its failure becomes a generic apology upstream.

pub mod agent;
pub mod moa;

use {secrecy::ExposeSecret, serde::Deserialize, thiserror::Error, tracing::debug};

use omnigate_config::GatewayConfig;

pub use {agent::AgentClient, moa::MoaClient};

/// One dispatch call: identity, content, and the masked copy for storage.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub user_id: String,
    pub session_id: String,
    /// Sanitized (but unmasked) text the model sees.
    pub content: String,
    pub channel: String,
    /// Masked text persisted for audit, when masking found anything.
    pub content_for_storage: Option<String>,
}

impl DispatchRequest {
    /// Build a request with the synthesized gateway identity for a sender.
    #[must_use]
    pub fn for_sender(channel: &str, sender_id: &str, content: impl Into<String>) -> Self {
        Self {
            user_id: synthesized_user_id(channel, sender_id),
            session_id: synthesized_session_id(channel, sender_id),
            content: content.into(),
            channel: channel.to_string(),
            content_for_storage: None,
        }
    }
}

/// Stable user identity for a channel-scoped sender.
#[must_use]
pub fn synthesized_user_id(channel: &str, sender_id: &str) -> String {
    format!("gateway_{channel}_{sender_id}")
}

/// Stable session identity for a channel-scoped sender.
#[must_use]
pub fn synthesized_session_id(channel: &str, sender_id: &str) -> String {
    format!("gw_{channel}_{sender_id}")
}

/// Backend result, with defaults for anything the backend omits.
#[derive(Debug, Clone, Deserialize)]
pub struct AiReply {
    #[serde(default)]
    pub reply: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub credits_used: i64,
    #[serde(default)]
    pub credits_remaining: Option<i64>,
    #[serde(default = "default_key_source")]
    pub key_source: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn default_model() -> String {
    "unknown".into()
}

fn default_category() -> String {
    "chat".into()
}

fn default_key_source() -> String {
    "service".into()
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no backend configured")]
    NotConfigured,

    #[error("backend returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend response did not parse: {0}")]
    BadResponse(#[from] serde_json::Error),
}

/// The two-tier dispatcher.
pub struct AiDispatcher {
    agent: Option<AgentClient>,
    moa: Option<MoaClient>,
}

impl AiDispatcher {
    #[must_use]
    pub fn new(agent: Option<AgentClient>, moa: Option<MoaClient>) -> Self {
        Self { agent, moa }
    }

    /// Wire both tiers from configuration. Either tier may be absent.
    #[must_use]
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        let agent = cfg.openclaw_gateway_url.as_ref().map(|url| {
            AgentClient::new(
                url.clone(),
                cfg.openclaw_gateway_token
                    .as_ref()
                    .map(|t| t.expose_secret().clone()),
                std::time::Duration::from_millis(cfg.openclaw_timeout_ms),
            )
        });
        let moa = match (&cfg.moa_api_url, &cfg.moa_api_secret) {
            (Some(url), Some(secret)) => Some(MoaClient::new(url.clone(), secret.clone())),
            _ => None,
        };
        Self { agent, moa }
    }

    /// Attempt Tier 1, fall through to Tier 2.
    pub async fn dispatch(&self, req: &DispatchRequest) -> Result<AiReply, DispatchError> {
        if let Some(agent) = &self.agent
            && let Some(text) = agent.try_chat(&req.session_id, &req.content).await
        {
            debug!(session = %req.session_id, "agent tier answered");
            return Ok(AiReply {
                reply: text,
                model: "openclaw-agent".into(),
                category: "agent".into(),
                credits_used: 0,
                credits_remaining: None,
                key_source: "gateway".into(),
                timestamp: None,
            });
        }

        match &self.moa {
            Some(moa) => moa.chat(req).await,
            None => Err(DispatchError::NotConfigured),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_identities() {
        assert_eq!(synthesized_user_id("mattermost", "U1"), "gateway_mattermost_U1");
        assert_eq!(synthesized_session_id("mattermost", "U1"), "gw_mattermost_U1");
    }

    #[test]
    fn reply_defaults_fill_missing_fields() {
        let reply: AiReply = serde_json::from_str(r#"{"reply":"hi"}"#).unwrap();
        assert_eq!(reply.reply, "hi");
        assert_eq!(reply.model, "unknown");
        assert_eq!(reply.category, "chat");
        assert_eq!(reply.credits_used, 0);
        assert!(reply.credits_remaining.is_none());
        assert_eq!(reply.key_source, "service");
    }

    #[tokio::test]
    async fn no_backend_is_an_error() {
        let dispatcher = AiDispatcher::new(None, None);
        let req = DispatchRequest::for_sender("slack", "U", "hello");
        assert!(matches!(
            dispatcher.dispatch(&req).await,
            Err(DispatchError::NotConfigured)
        ));
    }

    /// Tier 1 health probe failing must fall through to Tier 2.
    #[tokio::test]
    async fn agent_failure_falls_through_to_rest_tier() {
        let mut server = mockito::Server::new_async().await;
        let health = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/api/chat")
            .match_header("x-gateway-channel", "slack")
            .with_status(200)
            .with_body(r#"{"reply":"hi","model":"m","category":"c","credits_used":1}"#)
            .create_async()
            .await;

        let agent = AgentClient::new(
            server.url(),
            None,
            std::time::Duration::from_millis(2_000),
        );
        let moa = MoaClient::new(server.url(), secrecy::Secret::new("s".to_string()));
        let dispatcher = AiDispatcher::new(Some(agent), Some(moa));

        let req = DispatchRequest::for_sender("slack", "U", "hello");
        let reply = dispatcher.dispatch(&req).await.unwrap();
        assert_eq!(reply.reply, "hi");
        assert_eq!(reply.model, "m");

        health.assert_async().await;
        chat.assert_async().await;
    }
}
