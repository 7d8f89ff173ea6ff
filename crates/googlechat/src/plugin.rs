use std::sync::{Arc, RwLock};

use {
    anyhow::Result,
    async_trait::async_trait,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use {
    omnigate_auth::timing_safe_eq,
    omnigate_channels::plugin::{ChannelPlugin, WebhookRequest, WebhookResponse},
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_config::{GatewayConfig, GoogleChatConfig},
};

use crate::token::TokenMinter;

pub const CHANNEL: &str = "googlechat";

const DEFAULT_API_BASE: &str = "https://chat.googleapis.com/v1";

#[derive(Debug, Deserialize)]
struct ChatEvent {
    r#type: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    space: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    text: Option<String>,
    /// Message text with the leading @mention removed.
    #[serde(default)]
    #[serde(rename = "argumentText")]
    argument_text: Option<String>,
    #[serde(default)]
    sender: Option<Sender>,
    #[serde(default)]
    thread: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct Sender {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

struct Egress {
    minter: TokenMinter,
    api_base: String,
    http: reqwest::Client,
}

pub struct GoogleChatPlugin {
    config: RwLock<GoogleChatConfig>,
    egress: RwLock<Option<Arc<Egress>>>,
    api_base: String,
}

impl Default for GoogleChatPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleChatPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RwLock::new(GoogleChatConfig::default()),
            egress: RwLock::new(None),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Point the REST egress somewhere else (tests).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn egress(&self) -> Option<Arc<Egress>> {
        self.egress.read().ok().and_then(|s| s.clone())
    }

    fn decode(&self, req: &WebhookRequest) -> WebhookResponse {
        let config = match self.config.read() {
            Ok(config) => config.clone(),
            Err(_) => return WebhookResponse::bad_request(),
        };

        let event: ChatEvent = match serde_json::from_slice(&req.body) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "googlechat event did not parse");
                return WebhookResponse::bad_request();
            },
        };

        // Chat attaches the bot's verification token to every event.
        if let Some(expected) = &config.verification_token {
            let provided = event.token.as_deref().unwrap_or("");
            if !timing_safe_eq(expected.expose_secret().as_bytes(), provided.as_bytes()) {
                warn!("googlechat verification token mismatch");
                return WebhookResponse::unauthorized();
            }
        }

        if event.r#type != "MESSAGE" {
            // ADDED_TO_SPACE and friends are acknowledged, not processed.
            return WebhookResponse::ok_empty();
        }
        let Some(message) = event.message else {
            return WebhookResponse::ok_empty();
        };
        let sender = message.sender.unwrap_or(Sender {
            name: None,
            display_name: None,
            r#type: None,
        });
        if sender.r#type.as_deref() == Some("BOT") {
            return WebhookResponse::ok_empty();
        }
        let Some(sender_id) = sender.name else {
            return WebhookResponse::ok_empty();
        };

        // argumentText already has the @mention stripped; prefer it.
        let text = message
            .argument_text
            .or(message.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let Some(text) = text else {
            return WebhookResponse::ok_empty();
        };

        let space = event.space.and_then(|s| s.name);
        let mut msg = IncomingMessage::new(CHANNEL, sender_id, text);
        msg.sender_name = sender.display_name;
        msg.message_id = message.name;
        msg.group_id = space.clone();
        if let Some(space) = space {
            msg.meta.insert("space".into(), space);
        }
        if let Some(thread) = message.thread.and_then(|t| t.name) {
            msg.meta.insert("thread".into(), thread);
        }

        WebhookResponse::ok(vec![msg])
    }
}

#[async_trait]
impl ChannelPlugin for GoogleChatPlugin {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn display_name(&self) -> &str {
        "Google Chat"
    }

    fn is_configured(&self, cfg: &GatewayConfig) -> bool {
        cfg.googlechat.verification_token.is_some()
            || (cfg.googlechat.service_account_email.is_some()
                && cfg.googlechat.private_key_pem.is_some())
    }

    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()> {
        if let Ok(mut config) = self.config.write() {
            *config = cfg.googlechat.clone();
        }

        let (Some(email), Some(pem)) = (
            cfg.googlechat.service_account_email.clone(),
            cfg.googlechat.private_key_pem.clone(),
        ) else {
            info!("googlechat: no service account, webhook ingress only");
            return Ok(());
        };

        // A bad key should fail the boot, not the first delivery.
        let minter = TokenMinter::new(email, pem.expose_secret())?;
        if let Ok(mut egress) = self.egress.write() {
            *egress = Some(Arc::new(Egress {
                minter,
                api_base: self.api_base.clone(),
                http: reqwest::Client::new(),
            }));
        }
        info!("googlechat adapter ready");
        Ok(())
    }

    async fn handle_webhook(&self, req: WebhookRequest) -> WebhookResponse {
        self.decode(&req)
    }

    async fn deliver(&self, params: &DeliveryParams) -> bool {
        let Some(egress) = self.egress() else {
            warn!("googlechat deliver: egress not configured");
            return false;
        };

        // Space name travels in metadata; a bare user id is undeliverable
        // because the Chat API only posts into spaces.
        let Some(space) = params
            .meta
            .get("space")
            .cloned()
            .or_else(|| params.thread_id.clone())
        else {
            warn!("googlechat deliver: no space in delivery metadata");
            return false;
        };

        let token = match egress.minter.token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "googlechat token mint failed");
                return false;
            },
        };

        let mut body = serde_json::json!({ "text": params.text });
        if let Some(thread) = params.meta.get("thread") {
            body["thread"] = serde_json::json!({ "name": thread });
        }

        let result = egress
            .http
            .post(format!("{}/{space}/messages", egress.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "googlechat send rejected");
                false
            },
            Err(e) => {
                warn!(error = %e, "googlechat send failed");
                false
            },
        }
    }

    async fn shutdown(&self) {
        let egress = self.egress.read().ok().and_then(|e| e.clone());
        if let Some(egress) = egress {
            egress.minter.clear().await;
        }
        if let Ok(mut egress) = self.egress.write() {
            *egress = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::Secret;

    const MESSAGE_EVENT: &str = r#"{
        "type": "MESSAGE",
        "token": "verify-me",
        "space": {"name": "spaces/AAA"},
        "message": {
            "name": "spaces/AAA/messages/BBB",
            "text": "@bot what's the status",
            "argumentText": "what's the status",
            "sender": {"name": "users/123", "displayName": "Alice", "type": "HUMAN"},
            "thread": {"name": "spaces/AAA/threads/TTT"}
        }
    }"#;

    fn plugin_with_token(token: &str) -> GoogleChatPlugin {
        let plugin = GoogleChatPlugin::new();
        *plugin.config.write().unwrap() = GoogleChatConfig {
            verification_token: Some(Secret::new(token.into())),
            ..Default::default()
        };
        plugin
    }

    fn request(body: &str) -> WebhookRequest {
        WebhookRequest::new("/webhook/googlechat", "POST", body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn message_event_decodes_with_mention_stripped() {
        let resp = plugin_with_token("verify-me")
            .handle_webhook(request(MESSAGE_EVENT))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.messages.len(), 1);

        let msg = &resp.messages[0];
        assert_eq!(msg.sender_id, "users/123");
        assert_eq!(msg.text, "what's the status");
        assert_eq!(msg.sender_name.as_deref(), Some("Alice"));
        assert_eq!(msg.group_id.as_deref(), Some("spaces/AAA"));
        assert_eq!(msg.meta.get("space").map(String::as_str), Some("spaces/AAA"));
        assert_eq!(
            msg.meta.get("thread").map(String::as_str),
            Some("spaces/AAA/threads/TTT")
        );
    }

    /// The verification token authenticates Google as the caller.
    #[tokio::test]
    async fn security_wrong_verification_token_is_401() {
        let resp = plugin_with_token("other-token")
            .handle_webhook(request(MESSAGE_EVENT))
            .await;
        assert_eq!(resp.status, 401);
    }

    #[tokio::test]
    async fn bot_senders_are_dropped() {
        let body = r#"{"type":"MESSAGE","token":"verify-me",
            "message":{"text":"loop","sender":{"name":"users/bot","type":"BOT"}}}"#;
        let resp = plugin_with_token("verify-me").handle_webhook(request(body)).await;
        assert_eq!(resp.status, 200);
        assert!(resp.messages.is_empty());
    }

    #[tokio::test]
    async fn added_to_space_is_acknowledged_empty() {
        let body = r#"{"type":"ADDED_TO_SPACE","token":"verify-me","space":{"name":"spaces/AAA"}}"#;
        let resp = plugin_with_token("verify-me").handle_webhook(request(body)).await;
        assert_eq!(resp.status, 200);
        assert!(resp.messages.is_empty());
    }

    #[tokio::test]
    async fn deliver_posts_into_the_space_thread() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"ya29.x","expires_in":3600}"#)
            .create_async()
            .await;
        let send_mock = server
            .mock("POST", "/spaces/AAA/messages")
            .match_header("authorization", "Bearer ya29.x")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"text":"reply","thread":{"name":"spaces/AAA/threads/TTT"}}"#.into(),
            ))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let plugin = GoogleChatPlugin::new();
        let minter = TokenMinter::with_token_url(
            "sa@example.iam.gserviceaccount.com".into(),
            crate::token::TEST_KEY_PEM,
            format!("{}/token", server.url()),
        )
        .unwrap();
        *plugin.egress.write().unwrap() = Some(Arc::new(Egress {
            minter,
            api_base: server.url(),
            http: reqwest::Client::new(),
        }));

        let mut params = DeliveryParams::new("users/123", "reply");
        params.meta.insert("space".into(), "spaces/AAA".into());
        params.meta.insert("thread".into(), "spaces/AAA/threads/TTT".into());

        assert!(plugin.deliver(&params).await);
        token_mock.assert_async().await;
        send_mock.assert_async().await;
    }

    #[tokio::test]
    async fn deliver_without_space_fails_closed() {
        let plugin = GoogleChatPlugin::new();
        assert!(!plugin.deliver(&DeliveryParams::new("users/123", "text")).await);
    }
}
