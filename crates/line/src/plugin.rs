use std::sync::{Arc, RwLock};

use {
    anyhow::{Result, bail},
    async_trait::async_trait,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use {
    omnigate_auth::verify_hmac_sha256_base64,
    omnigate_channels::plugin::{ChannelPlugin, WebhookRequest, WebhookResponse},
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_config::{GatewayConfig, LineConfig},
};

pub const CHANNEL: &str = "line";

/// Reply tokens are single-use and short-lived; after this window the
/// adapter switches to a push message.
const REPLY_TOKEN_WINDOW_MS: i64 = 55_000;

const DEFAULT_API_BASE: &str = "https://api.line.me";

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct Event {
    r#type: String,
    #[serde(default)]
    #[serde(rename = "replyToken")]
    reply_token: Option<String>,
    #[serde(default)]
    source: Option<Source>,
    #[serde(default)]
    message: Option<EventMessage>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Source {
    #[serde(default)]
    #[serde(rename = "userId")]
    user_id: Option<String>,
    #[serde(default)]
    #[serde(rename = "groupId")]
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    r#type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone)]
struct RestState {
    api_base: String,
    access_token: String,
    http: reqwest::Client,
}

pub struct LinePlugin {
    config: RwLock<LineConfig>,
    rest: RwLock<Option<Arc<RestState>>>,
    api_base: String,
}

impl Default for LinePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LinePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RwLock::new(LineConfig::default()),
            rest: RwLock::new(None),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the REST egress somewhere else (tests).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn rest_state(&self) -> Option<Arc<RestState>> {
        self.rest.read().ok().and_then(|s| s.clone())
    }

    fn verify_signature(&self, req: &WebhookRequest) -> bool {
        let config = match self.config.read() {
            Ok(config) => config.clone(),
            Err(_) => return false,
        };
        let Some(secret) = config.channel_secret else {
            return false;
        };
        let Some(signature) = req.header("x-line-signature") else {
            return false;
        };
        verify_hmac_sha256_base64(&req.body_str(), signature, secret.expose_secret())
    }

    fn decode(&self, req: &WebhookRequest) -> WebhookResponse {
        let envelope: WebhookEnvelope = match serde_json::from_slice(&req.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "line webhook body did not parse");
                return WebhookResponse::bad_request();
            },
        };

        let mut messages = Vec::new();
        for event in envelope.events {
            if event.r#type != "message" {
                continue;
            }
            let Some(message) = event.message else { continue };
            if message.r#type != "text" {
                continue;
            }
            let Some(text) = message.text.filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            let Some(user_id) = event.source.as_ref().and_then(|s| s.user_id.clone()) else {
                continue;
            };

            let mut msg = IncomingMessage::new(CHANNEL, user_id, text.trim());
            msg.message_id = message.id;
            msg.group_id = event.source.as_ref().and_then(|s| s.group_id.clone());
            msg.timestamp = event.timestamp;
            if let Some(token) = event.reply_token {
                msg.meta.insert("reply_token".into(), token);
                msg.meta.insert(
                    "received_at_ms".into(),
                    chrono::Utc::now().timestamp_millis().to_string(),
                );
            }
            messages.push(msg);
        }

        WebhookResponse::ok(messages)
    }

    /// Whether the reply token captured at ingress is still usable.
    fn reply_token(params: &DeliveryParams) -> Option<&str> {
        let token = params.meta.get("reply_token")?;
        let received: i64 = params.meta.get("received_at_ms")?.parse().ok()?;
        let age = chrono::Utc::now().timestamp_millis() - received;
        (age < REPLY_TOKEN_WINDOW_MS).then_some(token.as_str())
    }

    async fn send(&self, state: &RestState, path: &str, body: serde_json::Value) -> bool {
        let result = state
            .http
            .post(format!("{}{path}", state.api_base))
            .bearer_auth(&state.access_token)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), path, "line send rejected");
                false
            },
            Err(e) => {
                warn!(error = %e, path, "line send failed");
                false
            },
        }
    }
}

#[async_trait]
impl ChannelPlugin for LinePlugin {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn display_name(&self) -> &str {
        "LINE"
    }

    fn is_configured(&self, cfg: &GatewayConfig) -> bool {
        cfg.line.channel_secret.is_some() && cfg.line.channel_access_token.is_some()
    }

    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()> {
        if let Ok(mut config) = self.config.write() {
            *config = cfg.line.clone();
        }
        let Some(access_token) = cfg.line.channel_access_token.clone() else {
            bail!("line channel access token is required");
        };

        if let Ok(mut rest) = self.rest.write() {
            *rest = Some(Arc::new(RestState {
                api_base: self.api_base.clone(),
                access_token: access_token.expose_secret().clone(),
                http: reqwest::Client::new(),
            }));
        }
        info!("line adapter ready");
        Ok(())
    }

    async fn handle_webhook(&self, req: WebhookRequest) -> WebhookResponse {
        if !self.verify_signature(&req) {
            warn!("line webhook signature rejected");
            return WebhookResponse::unauthorized();
        }
        self.decode(&req)
    }

    async fn deliver(&self, params: &DeliveryParams) -> bool {
        let Some(state) = self.rest_state() else {
            warn!("line deliver: not initialized");
            return false;
        };

        let messages = serde_json::json!([{ "type": "text", "text": params.text }]);

        // Reply while the token window is open; push after that.
        if let Some(token) = Self::reply_token(params) {
            let body = serde_json::json!({ "replyToken": token, "messages": messages });
            if self.send(&state, "/v2/bot/message/reply", body).await {
                return true;
            }
            debug!("line reply failed, falling back to push");
        }

        let to = params.thread_id.as_deref().unwrap_or(&params.recipient_id);
        let body = serde_json::json!({ "to": to, "messages": messages });
        self.send(&state, "/v2/bot/message/push", body).await
    }

    async fn shutdown(&self) {
        if let Ok(mut rest) = self.rest.write() {
            *rest = None;
        }
    }
}
