use std::{collections::HashMap, sync::Arc};

use {anyhow::Result, async_trait::async_trait};

use {
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_config::GatewayConfig,
};

/// An HTTP request pushed to an adapter by the webhook edge.
///
/// Headers are stored with lowercase names; the raw body is kept as bytes so
/// signature verification operates on exactly what the platform signed.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub path: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(path: impl Into<String>, method: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            headers: HashMap::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_lowercase(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    #[must_use]
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// What an adapter hands back to the webhook edge.
///
/// `status` and `body` are echoed to the platform verbatim; `messages` are
/// fed into the ingress pipeline after the HTTP response is produced, so
/// platforms with short reply windows get their acknowledgement first.
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Option<String>,
    pub messages: Vec<IncomingMessage>,
}

impl WebhookResponse {
    /// 200 with no messages — the event type is not one we handle, and the
    /// platform must not retry it.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self {
            status: 200,
            body: None,
            messages: Vec::new(),
        }
    }

    #[must_use]
    pub fn ok(messages: Vec<IncomingMessage>) -> Self {
        Self {
            status: 200,
            body: None,
            messages,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// 401 — signature or token verification failed.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self {
            status: 401,
            body: None,
            messages: Vec::new(),
        }
    }

    /// 400 — body did not parse.
    #[must_use]
    pub fn bad_request() -> Self {
        Self {
            status: 400,
            body: None,
            messages: Vec::new(),
        }
    }
}

/// Where polling and long-poll adapters push the messages their background
/// loops produce. The host wires this to the ingress pipeline before
/// `initialize`.
#[async_trait]
pub trait IngressSink: Send + Sync {
    async fn accept(&self, msg: IncomingMessage);
}

/// Core channel adapter contract. One implementation per platform.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Channel tag (e.g. "mattermost"). Unique across the registry.
    fn channel(&self) -> &'static str;

    /// Human-readable name for logs and the admin surface.
    fn display_name(&self) -> &str;

    /// Purely inspects configuration; no I/O.
    fn is_configured(&self, cfg: &GatewayConfig) -> bool;

    /// Register the ingress sink for background-loop adapters.
    ///
    /// Called by the host before [`initialize`](Self::initialize). The
    /// default is a no-op: webhook-only adapters are pushed by the HTTP edge
    /// and never produce messages on their own.
    fn attach_ingress(&self, _sink: Arc<dyn IngressSink>) {}

    /// Verify credentials and start any background loop.
    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()>;

    /// Synchronously decode a platform-pushed HTTP request.
    ///
    /// Must verify any platform signature (401 on failure), reject bodies
    /// that do not parse (400), and answer 200 with no messages for event
    /// types we do not handle.
    async fn handle_webhook(&self, req: WebhookRequest) -> WebhookResponse;

    /// Egress. Returns false on transport or platform error; never panics
    /// across the pipeline boundary.
    async fn deliver(&self, params: &DeliveryParams) -> bool;

    /// Stop timers and sockets, drop cached tokens.
    async fn shutdown(&self);
}
