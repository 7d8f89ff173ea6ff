use std::sync::{Arc, RwLock};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use {
    omnigate_auth::verify_hmac_sha256,
    omnigate_channels::plugin::{ChannelPlugin, WebhookRequest, WebhookResponse},
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_config::{GatewayConfig, SlackConfig},
};

pub const CHANNEL: &str = "slack";

/// Signed requests older than this are replayable and refused.
const SIGNATURE_MAX_AGE_SECS: i64 = 300;

const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct Envelope {
    r#type: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<MessageEvent>,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    r#type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Clone)]
struct RestState {
    api_base: String,
    bot_token: String,
    bot_user_id: Option<String>,
    http: reqwest::Client,
}

pub struct SlackPlugin {
    config: RwLock<SlackConfig>,
    rest: RwLock<Option<Arc<RestState>>>,
    api_base: String,
}

impl Default for SlackPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RwLock::new(SlackConfig::default()),
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
        let Some(secret) = config.signing_secret else {
            // No secret configured: refuse rather than accept unsigned
            // traffic.
            return false;
        };

        let (Some(timestamp), Some(signature)) = (
            req.header("x-slack-request-timestamp"),
            req.header("x-slack-signature"),
        ) else {
            return false;
        };
        let Ok(ts) = timestamp.parse::<i64>() else {
            return false;
        };
        let now = chrono::Utc::now().timestamp();
        if (now - ts).abs() > SIGNATURE_MAX_AGE_SECS {
            return false;
        }

        let basestring = format!("v0:{timestamp}:{}", req.body_str());
        verify_hmac_sha256(&basestring, signature, secret.expose_secret(), "v0=")
    }

    fn decode(&self, req: &WebhookRequest) -> WebhookResponse {
        let envelope: Envelope = match serde_json::from_slice(&req.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "slack webhook body did not parse");
                return WebhookResponse::bad_request();
            },
        };

        // The URL-verification handshake echoes the challenge back.
        if envelope.r#type == "url_verification" {
            return match envelope.challenge {
                Some(challenge) => WebhookResponse::ok_empty().with_body(challenge),
                None => WebhookResponse::bad_request(),
            };
        }
        if envelope.r#type != "event_callback" {
            return WebhookResponse::ok_empty();
        }

        let Some(event) = envelope.event else {
            return WebhookResponse::ok_empty();
        };
        if event.r#type != "message" || event.subtype.is_some() || event.bot_id.is_some() {
            return WebhookResponse::ok_empty();
        }
        let (Some(user), Some(text)) = (event.user, event.text) else {
            return WebhookResponse::ok_empty();
        };
        if text.trim().is_empty() {
            return WebhookResponse::ok_empty();
        }

        // Our own messages come back through the Events API too.
        if let Some(state) = self.rest_state()
            && state.bot_user_id.as_deref() == Some(user.as_str())
        {
            return WebhookResponse::ok_empty();
        }

        let mut msg = IncomingMessage::new(CHANNEL, user, text.trim());
        msg.message_id = event.ts.clone();
        msg.group_id = event.channel.clone();
        if let Some(channel) = event.channel {
            msg.meta.insert("channel".into(), channel);
        }
        if let Some(thread_ts) = event.thread_ts.or(event.ts) {
            msg.meta.insert("thread_ts".into(), thread_ts);
        }

        WebhookResponse::ok(vec![msg])
    }

    /// Open (or fetch) the one-to-one conversation with a user.
    async fn open_conversation(&self, state: &RestState, user_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct OpenResponse {
            ok: bool,
            #[serde(default)]
            channel: Option<OpenedChannel>,
            #[serde(default)]
            error: Option<String>,
        }
        #[derive(Deserialize)]
        struct OpenedChannel {
            id: String,
        }

        let resp: OpenResponse = state
            .http
            .post(format!("{}/conversations.open", state.api_base))
            .bearer_auth(&state.bot_token)
            .json(&serde_json::json!({ "users": user_id }))
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            bail!("conversations.open failed: {}", resp.error.unwrap_or_default());
        }
        resp.channel
            .map(|c| c.id)
            .context("conversations.open returned no channel")
    }
}

#[async_trait]
impl ChannelPlugin for SlackPlugin {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn display_name(&self) -> &str {
        "Slack"
    }

    fn is_configured(&self, cfg: &GatewayConfig) -> bool {
        cfg.slack.signing_secret.is_some() && cfg.slack.bot_token.is_some()
    }

    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()> {
        if let Ok(mut config) = self.config.write() {
            *config = cfg.slack.clone();
        }
        let Some(bot_token) = cfg.slack.bot_token.clone() else {
            bail!("slack bot token is required");
        };

        let http = reqwest::Client::new();

        #[derive(Deserialize)]
        struct AuthTest {
            ok: bool,
            #[serde(default)]
            user_id: Option<String>,
            #[serde(default)]
            error: Option<String>,
        }
        let auth: AuthTest = http
            .post(format!("{}/auth.test", self.api_base))
            .bearer_auth(bot_token.expose_secret())
            .send()
            .await
            .context("slack unreachable")?
            .json()
            .await?;
        if !auth.ok {
            bail!("slack rejected the bot token: {}", auth.error.unwrap_or_default());
        }

        info!(bot_user = ?auth.user_id, "slack bot authenticated");

        if let Ok(mut rest) = self.rest.write() {
            *rest = Some(Arc::new(RestState {
                api_base: self.api_base.clone(),
                bot_token: bot_token.expose_secret().clone(),
                bot_user_id: auth.user_id,
                http,
            }));
        }
        Ok(())
    }

    async fn handle_webhook(&self, req: WebhookRequest) -> WebhookResponse {
        if !self.verify_signature(&req) {
            warn!("slack webhook signature rejected");
            return WebhookResponse::unauthorized();
        }
        self.decode(&req)
    }

    async fn deliver(&self, params: &DeliveryParams) -> bool {
        let Some(state) = self.rest_state() else {
            warn!("slack deliver: not initialized");
            return false;
        };

        let channel = match params.meta.get("channel").cloned().or_else(|| params.thread_id.clone())
        {
            Some(channel) => channel,
            None => match self.open_conversation(&state, &params.recipient_id).await {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(error = %e, "slack conversation open failed");
                    return false;
                },
            },
        };

        let mut body = serde_json::json!({
            "channel": channel,
            "text": params.text,
        });
        if let Some(thread_ts) = params.meta.get("thread_ts").or(params.reply_to_id.as_ref()) {
            body["thread_ts"] = serde_json::Value::String(thread_ts.clone());
        }

        #[derive(Deserialize)]
        struct PostResponse {
            ok: bool,
            #[serde(default)]
            error: Option<String>,
        }

        let result = state
            .http
            .post(format!("{}/chat.postMessage", state.api_base))
            .bearer_auth(&state.bot_token)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) => match resp.json::<PostResponse>().await {
                Ok(parsed) if parsed.ok => true,
                Ok(parsed) => {
                    warn!(error = ?parsed.error, "slack postMessage rejected");
                    false
                },
                Err(e) => {
                    warn!(error = %e, "slack postMessage response did not parse");
                    false
                },
            },
            Err(e) => {
                warn!(error = %e, "slack postMessage failed");
                false
            },
        }
    }

    async fn shutdown(&self) {
        if let Ok(mut rest) = self.rest.write() {
            *rest = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use {
        hmac::{Hmac, Mac},
        secrecy::Secret,
        sha2::Sha256,
    };

    const SECRET: &str = "slack-signing-secret";

    fn plugin() -> SlackPlugin {
        let plugin = SlackPlugin::new();
        *plugin.config.write().unwrap() = SlackConfig {
            signing_secret: Some(Secret::new(SECRET.into())),
            bot_token: Some(Secret::new("xoxb-test".into())),
        };
        plugin
    }

    fn signed_request(body: &str) -> WebhookRequest {
        let ts = chrono::Utc::now().timestamp().to_string();
        let basestring = format!("v0:{ts}:{body}");
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(basestring.as_bytes());
        let signature = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

        WebhookRequest::new("/webhook/slack", "POST", body.as_bytes().to_vec())
            .with_header("x-slack-request-timestamp", ts)
            .with_header("x-slack-signature", signature)
    }

    #[tokio::test]
    async fn url_verification_echoes_the_challenge() {
        let resp = plugin()
            .handle_webhook(signed_request(
                r#"{"type":"url_verification","challenge":"c0ffee"}"#,
            ))
            .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_deref(), Some("c0ffee"));
        assert!(resp.messages.is_empty());
    }

    #[tokio::test]
    async fn message_event_decodes() {
        let body = r#"{"type":"event_callback","event":{"type":"message","user":"U7",
            "text":"hello there","channel":"C9","ts":"123.456"}}"#;
        let resp = plugin().handle_webhook(signed_request(body)).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.messages.len(), 1);

        let msg = &resp.messages[0];
        assert_eq!(msg.sender_id, "U7");
        assert_eq!(msg.text, "hello there");
        assert_eq!(msg.group_id.as_deref(), Some("C9"));
        assert_eq!(msg.meta.get("thread_ts").map(String::as_str), Some("123.456"));
    }

    #[tokio::test]
    async fn bot_messages_are_ignored() {
        let body = r#"{"type":"event_callback","event":{"type":"message","bot_id":"B1",
            "user":"U7","text":"echo","channel":"C9"}}"#;
        let resp = plugin().handle_webhook(signed_request(body)).await;
        assert_eq!(resp.status, 200);
        assert!(resp.messages.is_empty());
    }

    #[tokio::test]
    async fn unhandled_event_types_return_empty_200() {
        let body = r#"{"type":"event_callback","event":{"type":"reaction_added","user":"U7"}}"#;
        let resp = plugin().handle_webhook(signed_request(body)).await;
        assert_eq!(resp.status, 200);
        assert!(resp.messages.is_empty());
    }

    /// Requests without a valid v0 signature never reach the decoder.
    #[tokio::test]
    async fn security_bad_signature_is_401() {
        let body = r#"{"type":"event_callback","event":{"type":"message","user":"U7","text":"x","channel":"C9"}}"#;

        // missing headers
        let bare = WebhookRequest::new("/webhook/slack", "POST", body.as_bytes().to_vec());
        assert_eq!(plugin().handle_webhook(bare).await.status, 401);

        // wrong signature
        let forged = WebhookRequest::new("/webhook/slack", "POST", body.as_bytes().to_vec())
            .with_header(
                "x-slack-request-timestamp",
                chrono::Utc::now().timestamp().to_string(),
            )
            .with_header("x-slack-signature", "v0=deadbeef");
        assert_eq!(plugin().handle_webhook(forged).await.status, 401);
    }

    /// A correctly signed but stale request is a replay and is refused.
    #[tokio::test]
    async fn security_stale_timestamp_is_401() {
        let body = r#"{"type":"url_verification","challenge":"x"}"#;
        let ts = (chrono::Utc::now().timestamp() - 310).to_string();
        let basestring = format!("v0:{ts}:{body}");
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(basestring.as_bytes());
        let signature = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

        let req = WebhookRequest::new("/webhook/slack", "POST", body.as_bytes().to_vec())
            .with_header("x-slack-request-timestamp", ts)
            .with_header("x-slack-signature", signature);
        assert_eq!(plugin().handle_webhook(req).await.status, 401);
    }

    #[tokio::test]
    async fn deliver_posts_to_channel_with_thread() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat.postMessage")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"channel":"C9","text":"reply","thread_ts":"123.456"}"#.into(),
            ))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let plugin = plugin();
        *plugin.rest.write().unwrap() = Some(Arc::new(RestState {
            api_base: server.url(),
            bot_token: "xoxb".into(),
            bot_user_id: Some("UBOT".into()),
            http: reqwest::Client::new(),
        }));

        let mut params = DeliveryParams::new("U7", "reply");
        params.meta.insert("channel".into(), "C9".into());
        params.meta.insert("thread_ts".into(), "123.456".into());

        assert!(plugin.deliver(&params).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn deliver_opens_a_dm_when_no_channel_hint() {
        let mut server = mockito::Server::new_async().await;
        let open = server
            .mock("POST", "/conversations.open")
            .with_status(200)
            .with_body(r#"{"ok":true,"channel":{"id":"D1"}}"#)
            .create_async()
            .await;
        let post = server
            .mock("POST", "/chat.postMessage")
            .match_body(mockito::Matcher::PartialJsonString(r#"{"channel":"D1"}"#.into()))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let plugin = plugin();
        *plugin.rest.write().unwrap() = Some(Arc::new(RestState {
            api_base: server.url(),
            bot_token: "xoxb".into(),
            bot_user_id: None,
            http: reqwest::Client::new(),
        }));

        assert!(plugin.deliver(&DeliveryParams::new("U7", "dm")).await);
        open.assert_async().await;
        post.assert_async().await;
    }
}
