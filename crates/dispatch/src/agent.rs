//! Tier 1: enhanced-agent client over a duplex connection.
//!
//! Sequence per call: HTTP health probe → `connect` handshake → `chat.send`
//! → consume frames until a terminal `chat` event or the overall deadline.
//! Every failure path returns `None` so the dispatcher falls through to the
//! REST tier.

use std::time::Duration;

use {
    anyhow::{Context, Result, bail},
    futures::{SinkExt, StreamExt},
    tokio_tungstenite::tungstenite::Message,
    tracing::{debug, warn},
};

use omnigate_protocol::{
    AgentFrame, ChatEventPayload, ChatSendParams, ChatState, ClientInfo, ConnectAuth,
    ConnectParams, EVENT_CHAT, METHOD_CHAT_SEND, METHOD_CONNECT, RequestFrame,
};

/// Health probe timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_REQ_ID: &str = "1";
const CHAT_REQ_ID: &str = "2";

pub struct AgentClient {
    ws_url: String,
    health_url: String,
    token: Option<String>,
    /// Overall wall-clock deadline for connect + chat.
    deadline: Duration,
    http: reqwest::Client,
}

impl AgentClient {
    #[must_use]
    pub fn new(url: String, token: Option<String>, deadline: Duration) -> Self {
        let (ws_url, health_url) = derive_urls(&url);
        Self {
            ws_url,
            health_url,
            token,
            deadline,
            http: reqwest::Client::new(),
        }
    }

    /// Run one chat turn. `None` means "use the next tier".
    pub async fn try_chat(&self, session_key: &str, message: &str) -> Option<String> {
        if !self.health_ok().await {
            debug!("agent health probe failed, skipping tier");
            return None;
        }

        match tokio::time::timeout(self.deadline, self.run_chat(session_key, message)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "agent chat failed");
                None
            },
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis() as u64, "agent chat deadline hit");
                None
            },
        }
    }

    async fn health_ok(&self) -> bool {
        let probe = self.http.get(&self.health_url).timeout(PROBE_TIMEOUT).send();
        match probe.await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(_) => false,
        }
    }

    async fn run_chat(&self, session_key: &str, message: &str) -> Result<Option<String>> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .context("agent connect failed")?;
        let (mut sink, mut stream) = ws.split();

        let connect = RequestFrame::new(
            CONNECT_REQ_ID,
            METHOD_CONNECT,
            serde_json::to_value(ConnectParams {
                client: ClientInfo {
                    id: "omnigate".into(),
                    version: env!("CARGO_PKG_VERSION").into(),
                    platform: "gateway".into(),
                    mode: "channel".into(),
                },
                auth: self.token.clone().map(|token| ConnectAuth { token: Some(token) }),
                scopes: Some(vec!["chat".into()]),
            })?,
        );
        sink.send(Message::Text(serde_json::to_string(&connect)?.into()))
            .await?;

        let mut aggregator = ChatAggregator::default();
        let mut connected = false;

        while let Some(frame) = stream.next().await {
            let frame = frame.context("agent stream error")?;
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(aggregator.into_partial()),
                _ => continue,
            };
            let parsed: AgentFrame = match serde_json::from_str(text.as_str()) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!(error = %e, "ignoring unparseable agent frame");
                    continue;
                },
            };

            match parsed {
                AgentFrame::Response(res) if res.id == CONNECT_REQ_ID => {
                    if !res.ok {
                        bail!("agent rejected connect: {:?}", res.error.map(|e| e.message));
                    }
                    connected = true;
                    let send = RequestFrame::new(
                        CHAT_REQ_ID,
                        METHOD_CHAT_SEND,
                        serde_json::to_value(ChatSendParams {
                            session_key: session_key.to_string(),
                            message: message.to_string(),
                            idempotency_key: uuid::Uuid::new_v4().to_string(),
                            timeout_ms: Some(self.deadline.as_millis() as u64),
                        })?,
                    );
                    sink.send(Message::Text(serde_json::to_string(&send)?.into()))
                        .await?;
                },
                AgentFrame::Response(res) if res.id == CHAT_REQ_ID => {
                    if !res.ok {
                        // The request was refused outright; any streamed
                        // partial is all we will ever get.
                        return Ok(aggregator.into_partial());
                    }
                },
                AgentFrame::Response(_) | AgentFrame::Request(_) => {},
                AgentFrame::Event(event) => {
                    if event.event != EVENT_CHAT || !connected {
                        continue;
                    }
                    let Some(payload) = event.payload else { continue };
                    let chat: ChatEventPayload = match serde_json::from_value(payload) {
                        Ok(chat) => chat,
                        Err(_) => continue,
                    };
                    if let Some(outcome) = aggregator.apply(chat) {
                        return Ok(match outcome {
                            ChatOutcome::Final(text) => Some(text),
                            ChatOutcome::Error(partial) => partial,
                        });
                    }
                },
            }
        }

        Ok(aggregator.into_partial())
    }
}

/// Terminal result of a chat event stream.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatOutcome {
    Final(String),
    /// Errored; carries the accumulated partial text, if any.
    Error(Option<String>),
}

/// Folds `chat` events into a running text buffer.
///
/// Deltas accumulate; a `final` event's message content, when present, is
/// authoritative and replaces the buffer.
#[derive(Debug, Default)]
pub struct ChatAggregator {
    buffer: String,
}

impl ChatAggregator {
    /// Apply one event. `Some` means the stream is finished.
    pub fn apply(&mut self, event: ChatEventPayload) -> Option<ChatOutcome> {
        if let Some(delta) = &event.delta {
            self.buffer.push_str(delta);
        }
        match event.state {
            ChatState::Streaming => None,
            ChatState::Final => {
                let authoritative = event
                    .message
                    .map(|m| m.text())
                    .filter(|text| !text.is_empty());
                Some(ChatOutcome::Final(
                    authoritative.unwrap_or_else(|| std::mem::take(&mut self.buffer)),
                ))
            },
            ChatState::Error => Some(ChatOutcome::Error(self.take_partial())),
        }
    }

    fn take_partial(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.buffer);
        (!text.trim().is_empty()).then_some(text)
    }

    fn into_partial(mut self) -> Option<String> {
        self.take_partial()
    }
}

/// Derive the duplex URL and the HTTP health URL from the configured
/// endpoint, whichever scheme it was given in.
fn derive_urls(url: &str) -> (String, String) {
    let trimmed = url.trim_end_matches('/');
    let ws_url = if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        trimmed.to_string()
    };
    let health_url = if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}/health")
    } else if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}/health")
    } else {
        format!("{ws_url}/health")
    };
    (ws_url, health_url)
}
