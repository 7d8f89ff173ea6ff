use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    omnigate_channels::plugin::{ChannelPlugin, IngressSink, WebhookRequest, WebhookResponse},
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_config::GatewayConfig,
};

pub const CHANNEL: &str = "signal";

/// Receive-poll cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ReceiveItem {
    #[serde(default)]
    envelope: Option<Envelope>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    #[serde(rename = "sourceName")]
    source_name: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    #[serde(rename = "dataMessage")]
    data_message: Option<DataMessage>,
}

#[derive(Debug, Deserialize)]
struct DataMessage {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    #[serde(rename = "groupInfo")]
    group_info: Option<GroupInfo>,
}

#[derive(Debug, Deserialize)]
struct GroupInfo {
    #[serde(default)]
    #[serde(rename = "groupId")]
    group_id: Option<String>,
}

#[derive(Clone)]
struct Session {
    api_url: String,
    number: String,
    http: reqwest::Client,
}

pub struct SignalPlugin {
    session: RwLock<Option<Arc<Session>>>,
    sink: RwLock<Option<Arc<dyn IngressSink>>>,
    cancel: RwLock<Option<CancellationToken>>,
}

impl Default for SignalPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            sink: RwLock::new(None),
            cancel: RwLock::new(None),
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    /// Convert one receive batch into canonical messages, dropping self-sent
    /// envelopes and anything without text.
    fn extract(items: Vec<ReceiveItem>, own_number: &str) -> Vec<IncomingMessage> {
        let mut out = Vec::new();
        for item in items {
            let Some(envelope) = item.envelope else { continue };
            let Some(source) = envelope.source else { continue };
            if source == own_number {
                continue;
            }
            let Some(data) = envelope.data_message else { continue };
            let Some(text) = data.message.as_deref().map(str::trim).filter(|t| !t.is_empty())
            else {
                continue;
            };

            let mut msg = IncomingMessage::new(CHANNEL, source, text);
            msg.sender_name = envelope.source_name;
            msg.timestamp = envelope.timestamp;
            msg.group_id = data.group_info.and_then(|g| g.group_id);
            out.push(msg);
        }
        out
    }

    async fn poll_once(session: &Session) -> Result<Vec<ReceiveItem>> {
        let url = format!(
            "{}/v1/receive/{}",
            session.api_url,
            urlencoding::encode(&session.number),
        );
        let items = session
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(items)
    }

    async fn run_poll_loop(
        session: Arc<Session>,
        sink: Arc<dyn IngressSink>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("signal poll loop stopped");
                    return;
                },
                _ = ticker.tick() => {},
            }
            match Self::poll_once(&session).await {
                Ok(items) => {
                    for msg in Self::extract(items, &session.number) {
                        debug!(sender = %msg.sender_id, "signal message received");
                        sink.accept(msg).await;
                    }
                },
                Err(e) => {
                    // Transient: the next tick retries.
                    debug!(error = %e, "signal receive poll failed");
                },
            }
        }
    }
}

#[async_trait]
impl ChannelPlugin for SignalPlugin {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn display_name(&self) -> &str {
        "Signal"
    }

    fn is_configured(&self, cfg: &GatewayConfig) -> bool {
        cfg.signal.api_url.is_some() && cfg.signal.number.is_some()
    }

    fn attach_ingress(&self, sink: Arc<dyn IngressSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()> {
        let (Some(api_url), Some(number)) = (cfg.signal.api_url.clone(), cfg.signal.number.clone())
        else {
            bail!("signal requires api_url and number");
        };
        let sink = self
            .sink
            .read()
            .ok()
            .and_then(|s| s.clone())
            .context("signal ingress sink not attached")?;

        let session = Arc::new(Session {
            api_url: api_url.trim_end_matches('/').to_string(),
            number,
            http: reqwest::Client::new(),
        });

        let cancel = CancellationToken::new();
        tokio::spawn(Self::run_poll_loop(
            Arc::clone(&session),
            sink,
            cancel.clone(),
        ));

        if let Ok(mut slot) = self.session.write() {
            *slot = Some(session);
        }
        if let Ok(mut slot) = self.cancel.write() {
            *slot = Some(cancel);
        }
        info!("signal adapter initialized");
        Ok(())
    }

    async fn handle_webhook(&self, _req: WebhookRequest) -> WebhookResponse {
        WebhookResponse::ok_empty().with_body("signal ingress polls the REST API; nothing to push")
    }

    async fn deliver(&self, params: &DeliveryParams) -> bool {
        let Some(session) = self.session() else {
            warn!("signal deliver: not initialized");
            return false;
        };

        let recipient = params
            .thread_id
            .clone()
            .unwrap_or_else(|| params.recipient_id.clone());
        let body = serde_json::json!({
            "message": params.text,
            "number": session.number,
            "recipients": [recipient],
        });

        let result = session
            .http
            .post(format!("{}/v2/send", session.api_url))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "signal send rejected");
                false
            },
            Err(e) => {
                warn!(error = %e, "signal send failed");
                false
            },
        }
    }

    async fn shutdown(&self) {
        if let Ok(mut slot) = self.cancel.write()
            && let Some(cancel) = slot.take()
        {
            cancel.cancel();
        }
        if let Ok(mut slot) = self.session.write() {
            *slot = None;
        }
    }
}
