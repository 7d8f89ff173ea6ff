use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, info, warn},
};

use {
    omnigate_auth::timing_safe_eq,
    omnigate_channels::plugin::{ChannelPlugin, WebhookRequest, WebhookResponse},
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_config::{GatewayConfig, MattermostConfig},
};

pub const CHANNEL: &str = "mattermost";

/// Outgoing-webhook payload the server POSTs at us.
#[derive(Debug, Deserialize)]
struct OutgoingWebhook {
    #[serde(default)]
    token: Option<String>,
    channel_id: String,
    user_id: String,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    trigger_word: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Clone)]
struct RestState {
    base_url: String,
    bot_token: String,
    bot_user_id: Option<String>,
    http: reqwest::Client,
}

pub struct MattermostPlugin {
    config: RwLock<MattermostConfig>,
    rest: RwLock<Option<Arc<RestState>>>,
    /// peer user id → direct channel id, filled lazily at egress.
    direct_channels: RwLock<HashMap<String, String>>,
}

impl Default for MattermostPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl MattermostPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RwLock::new(MattermostConfig::default()),
            rest: RwLock::new(None),
            direct_channels: RwLock::new(HashMap::new()),
        }
    }

    fn rest_state(&self) -> Option<Arc<RestState>> {
        self.rest.read().ok().and_then(|s| s.clone())
    }

    fn decode(&self, req: &WebhookRequest) -> WebhookResponse {
        let config = match self.config.read() {
            Ok(config) => config.clone(),
            Err(_) => return WebhookResponse::bad_request(),
        };

        let payload: OutgoingWebhook = match serde_json::from_slice(&req.body) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "mattermost webhook body did not parse");
                return WebhookResponse::bad_request();
            },
        };

        // The outgoing-webhook token is the only thing authenticating the
        // caller; verify it whenever one is configured.
        if let Some(expected) = &config.webhook_token {
            let provided = payload.token.as_deref().unwrap_or("");
            if !timing_safe_eq(expected.expose_secret().as_bytes(), provided.as_bytes()) {
                warn!("mattermost webhook token mismatch");
                return WebhookResponse::unauthorized();
            }
        }

        // Never answer our own posts.
        if let Some(state) = self.rest_state()
            && state.bot_user_id.as_deref() == Some(payload.user_id.as_str())
        {
            return WebhookResponse::ok_empty();
        }

        let trigger = payload
            .trigger_word
            .as_deref()
            .or(config.trigger_word.as_deref());
        let text = strip_trigger(&payload.text, trigger);
        if text.is_empty() {
            return WebhookResponse::ok_empty();
        }

        let mut msg = IncomingMessage::new(CHANNEL, payload.user_id, text)
            .with_meta("channel_id", payload.channel_id.clone());
        msg.sender_name = payload.user_name;
        msg.message_id = payload.post_id;
        msg.group_id = Some(payload.channel_id);
        msg.timestamp = payload.timestamp;

        WebhookResponse::ok(vec![msg])
    }

    /// Find or create the direct channel with a peer.
    async fn direct_channel(&self, state: &RestState, peer_id: &str) -> Result<String> {
        if let Ok(cache) = self.direct_channels.read()
            && let Some(id) = cache.get(peer_id)
        {
            return Ok(id.clone());
        }

        let bot_id = state
            .bot_user_id
            .clone()
            .context("bot user id unknown; cannot open a direct channel")?;

        #[derive(Deserialize)]
        struct Channel {
            id: String,
        }

        let channel: Channel = state
            .http
            .post(format!("{}/api/v4/channels/direct", state.base_url))
            .bearer_auth(&state.bot_token)
            .json(&serde_json::json!([bot_id, peer_id]))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Ok(mut cache) = self.direct_channels.write() {
            cache.insert(peer_id.to_string(), channel.id.clone());
        }
        Ok(channel.id)
    }
}

/// Remove the leading trigger word (and separating whitespace/colon), if any.
fn strip_trigger(text: &str, trigger: Option<&str>) -> String {
    let text = text.trim();
    let Some(trigger) = trigger.map(str::trim).filter(|t| !t.is_empty()) else {
        return text.to_string();
    };
    match text.strip_prefix(trigger) {
        Some(rest) => rest.trim_start_matches([':', ',']).trim().to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl ChannelPlugin for MattermostPlugin {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn display_name(&self) -> &str {
        "Mattermost"
    }

    fn is_configured(&self, cfg: &GatewayConfig) -> bool {
        cfg.mattermost.webhook_token.is_some()
            || (cfg.mattermost.base_url.is_some() && cfg.mattermost.bot_token.is_some())
    }

    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()> {
        if let Ok(mut config) = self.config.write() {
            *config = cfg.mattermost.clone();
        }

        let (Some(base_url), Some(bot_token)) =
            (cfg.mattermost.base_url.clone(), cfg.mattermost.bot_token.clone())
        else {
            info!("mattermost: no REST credentials, webhook ingress only");
            return Ok(());
        };

        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::new();

        // Credential check, and learn our own user id for echo suppression.
        #[derive(Deserialize)]
        struct Me {
            id: String,
            username: String,
        }
        let me: Me = http
            .get(format!("{base_url}/api/v4/users/me"))
            .bearer_auth(bot_token.expose_secret())
            .send()
            .await
            .context("mattermost unreachable")?
            .error_for_status()
            .context("mattermost rejected the bot token")?
            .json()
            .await?;

        info!(username = %me.username, "mattermost bot authenticated");

        if let Ok(mut rest) = self.rest.write() {
            *rest = Some(Arc::new(RestState {
                base_url,
                bot_token: bot_token.expose_secret().clone(),
                bot_user_id: Some(me.id),
                http,
            }));
        }
        Ok(())
    }

    async fn handle_webhook(&self, req: WebhookRequest) -> WebhookResponse {
        self.decode(&req)
    }

    async fn deliver(&self, params: &DeliveryParams) -> bool {
        let Some(state) = self.rest_state() else {
            warn!("mattermost deliver: REST egress not configured");
            return false;
        };

        // Prefer the channel the message came from; fall back to a direct
        // channel with the recipient.
        let channel_id = match params
            .meta
            .get("channel_id")
            .cloned()
            .or_else(|| params.thread_id.clone())
        {
            Some(id) => id,
            None => match self.direct_channel(&state, &params.recipient_id).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "mattermost direct channel resolution failed");
                    return false;
                },
            },
        };

        let mut body = serde_json::json!({
            "channel_id": channel_id,
            "message": params.text,
        });
        if let Some(root) = &params.reply_to_id {
            body["root_id"] = serde_json::Value::String(root.clone());
        }

        let result = state
            .http
            .post(format!("{}/api/v4/posts", state.base_url))
            .bearer_auth(&state.bot_token)
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "mattermost post rejected");
                false
            },
            Err(e) => {
                warn!(error = %e, "mattermost post failed");
                false
            },
        }
    }

    async fn shutdown(&self) {
        if let Ok(mut rest) = self.rest.write() {
            *rest = None;
        }
        if let Ok(mut cache) = self.direct_channels.write() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::Secret;

    fn webhook_body(json: &str) -> WebhookRequest {
        WebhookRequest::new("/webhook/mattermost", "POST", json.as_bytes().to_vec())
    }

    fn plugin_with(config: MattermostConfig) -> MattermostPlugin {
        let plugin = MattermostPlugin::new();
        *plugin.config.write().unwrap() = config;
        plugin
    }

    #[tokio::test]
    async fn outgoing_webhook_decodes_to_one_message() {
        let plugin = plugin_with(MattermostConfig::default());
        let req = webhook_body(
            r#"{"channel_id":"C1","user_id":"U1","text":"hello","post_id":"P1","trigger_word":"moa"}"#,
        );
        let resp = plugin.handle_webhook(req).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.messages.len(), 1);

        let msg = &resp.messages[0];
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.sender_id, "U1");
        assert_eq!(msg.group_id.as_deref(), Some("C1"));
        assert_eq!(msg.message_id.as_deref(), Some("P1"));
        assert_eq!(msg.meta.get("channel_id").map(String::as_str), Some("C1"));
    }

    #[tokio::test]
    async fn trigger_word_prefix_is_stripped() {
        let plugin = plugin_with(MattermostConfig::default());
        let req = webhook_body(
            r#"{"channel_id":"C1","user_id":"U1","text":"moa: what's up","trigger_word":"moa"}"#,
        );
        let resp = plugin.handle_webhook(req).await;
        assert_eq!(resp.messages[0].text, "what's up");
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let plugin = plugin_with(MattermostConfig::default());
        let resp = plugin.handle_webhook(webhook_body("not json")).await;
        assert_eq!(resp.status, 400);
        assert!(resp.messages.is_empty());
    }

    /// A configured webhook token must match or the request is rejected.
    #[tokio::test]
    async fn security_wrong_webhook_token_is_401() {
        let plugin = plugin_with(MattermostConfig {
            webhook_token: Some(Secret::new("expected".into())),
            ..Default::default()
        });

        let bad = webhook_body(r#"{"token":"wrong","channel_id":"C1","user_id":"U1","text":"hi"}"#);
        assert_eq!(plugin.handle_webhook(bad).await.status, 401);

        let missing = webhook_body(r#"{"channel_id":"C1","user_id":"U1","text":"hi"}"#);
        assert_eq!(plugin.handle_webhook(missing).await.status, 401);

        let good =
            webhook_body(r#"{"token":"expected","channel_id":"C1","user_id":"U1","text":"hi"}"#);
        let resp = plugin.handle_webhook(good).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.messages.len(), 1);
    }

    #[tokio::test]
    async fn bot_echo_is_dropped() {
        let plugin = plugin_with(MattermostConfig::default());
        *plugin.rest.write().unwrap() = Some(Arc::new(RestState {
            base_url: "http://unused".into(),
            bot_token: "t".into(),
            bot_user_id: Some("BOT".into()),
            http: reqwest::Client::new(),
        }));

        let req = webhook_body(r#"{"channel_id":"C1","user_id":"BOT","text":"echo"}"#);
        let resp = plugin.handle_webhook(req).await;
        assert_eq!(resp.status, 200);
        assert!(resp.messages.is_empty());
    }

    #[test]
    fn strip_trigger_variants() {
        assert_eq!(strip_trigger("moa hello", Some("moa")), "hello");
        assert_eq!(strip_trigger("moa: hello", Some("moa")), "hello");
        assert_eq!(strip_trigger("hello", Some("moa")), "hello");
        assert_eq!(strip_trigger("hello", None), "hello");
    }

    #[tokio::test]
    async fn deliver_posts_into_the_source_channel() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v4/posts")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"channel_id":"C1","message":"hi there","root_id":"P1"}"#.into(),
            ))
            .with_status(201)
            .with_body(r#"{"id":"newpost"}"#)
            .create_async()
            .await;

        let plugin = plugin_with(MattermostConfig::default());
        *plugin.rest.write().unwrap() = Some(Arc::new(RestState {
            base_url: server.url(),
            bot_token: "t".into(),
            bot_user_id: Some("BOT".into()),
            http: reqwest::Client::new(),
        }));

        let mut params = DeliveryParams::new("U1", "hi there");
        params.reply_to_id = Some("P1".into());
        params.meta.insert("channel_id".into(), "C1".into());

        assert!(plugin.deliver(&params).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn deliver_creates_a_direct_channel_when_needed() {
        let mut server = mockito::Server::new_async().await;
        let direct = server
            .mock("POST", "/api/v4/channels/direct")
            .with_status(201)
            .with_body(r#"{"id":"D9"}"#)
            .create_async()
            .await;
        let post = server
            .mock("POST", "/api/v4/posts")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"channel_id":"D9"}"#.into(),
            ))
            .with_status(201)
            .with_body(r#"{"id":"p"}"#)
            .create_async()
            .await;

        let plugin = plugin_with(MattermostConfig::default());
        *plugin.rest.write().unwrap() = Some(Arc::new(RestState {
            base_url: server.url(),
            bot_token: "t".into(),
            bot_user_id: Some("BOT".into()),
            http: reqwest::Client::new(),
        }));

        assert!(plugin.deliver(&DeliveryParams::new("U1", "dm text")).await);
        direct.assert_async().await;
        post.assert_async().await;

        // Second delivery to the same peer reuses the cached channel id.
        assert!(plugin.deliver(&DeliveryParams::new("U1", "again")).await);
    }

    #[tokio::test]
    async fn deliver_without_rest_state_fails_closed() {
        let plugin = plugin_with(MattermostConfig::default());
        assert!(!plugin.deliver(&DeliveryParams::new("U1", "text")).await);
    }
}
