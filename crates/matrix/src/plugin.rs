use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    omnigate_channels::plugin::{ChannelPlugin, IngressSink, WebhookRequest, WebhookResponse},
    omnigate_common::DeliveryParams,
    omnigate_config::GatewayConfig,
};

use crate::sync::{SyncResponse, extract_messages};

pub const CHANNEL: &str = "matrix";

/// Server-side long-poll window.
const SYNC_TIMEOUT_MS: u64 = 30_000;

/// Pause between long-poll rounds, success or failure.
const LOOP_DELAY: Duration = Duration::from_secs(1);

/// Backoff after a failed sync round.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Session {
    homeserver: String,
    access_token: String,
    user_id: String,
    http: reqwest::Client,
}

pub struct MatrixPlugin {
    session: RwLock<Option<Arc<Session>>>,
    sink: RwLock<Option<Arc<dyn IngressSink>>>,
    cancel: RwLock<Option<CancellationToken>>,
    /// peer user id → direct room id.
    direct_rooms: RwLock<HashMap<String, String>>,
}

impl Default for MatrixPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            sink: RwLock::new(None),
            cancel: RwLock::new(None),
            direct_rooms: RwLock::new(HashMap::new()),
        }
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    /// One `/sync` round. `since = None` is the initial sync that just
    /// establishes a token; its backlog is discarded.
    async fn sync_once(session: &Session, since: Option<&str>) -> Result<SyncResponse> {
        let mut url = format!(
            "{}/_matrix/client/v3/sync?timeout={}",
            session.homeserver,
            if since.is_some() { SYNC_TIMEOUT_MS } else { 0 },
        );
        if let Some(since) = since {
            url.push_str("&since=");
            url.push_str(since);
        }
        let response = session
            .http
            .get(url)
            .bearer_auth(&session.access_token)
            .timeout(Duration::from_millis(SYNC_TIMEOUT_MS + 15_000))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn run_sync_loop(
        session: Arc<Session>,
        sink: Arc<dyn IngressSink>,
        cancel: CancellationToken,
    ) {
        // Initial sync: establish the since-token, discard history.
        let mut since = loop {
            if cancel.is_cancelled() {
                return;
            }
            match Self::sync_once(&session, None).await {
                Ok(sync) => break sync.next_batch,
                Err(e) => {
                    warn!(error = %e, "matrix initial sync failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {},
                    }
                },
            }
        };
        info!("matrix sync established");

        loop {
            if cancel.is_cancelled() {
                info!("matrix sync loop stopped");
                return;
            }
            match Self::sync_once(&session, Some(&since)).await {
                Ok(sync) => {
                    for msg in extract_messages(&sync, &session.user_id) {
                        debug!(room = ?msg.group_id, "matrix message received");
                        sink.accept(msg).await;
                    }
                    since = sync.next_batch;
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(LOOP_DELAY) => {},
                    }
                },
                Err(e) => {
                    // Keep the since-token; re-poll after a backoff.
                    warn!(error = %e, "matrix sync failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {},
                    }
                },
            }
        }
    }

    /// Find or create the direct room with a peer.
    async fn direct_room(&self, session: &Session, peer_id: &str) -> Result<String> {
        if let Ok(cache) = self.direct_rooms.read()
            && let Some(id) = cache.get(peer_id)
        {
            return Ok(id.clone());
        }

        #[derive(Deserialize)]
        struct CreateRoomResponse {
            room_id: String,
        }

        let created: CreateRoomResponse = session
            .http
            .post(format!("{}/_matrix/client/v3/createRoom", session.homeserver))
            .bearer_auth(&session.access_token)
            .json(&serde_json::json!({
                "is_direct": true,
                "invite": [peer_id],
                "preset": "trusted_private_chat",
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Ok(mut cache) = self.direct_rooms.write() {
            cache.insert(peer_id.to_string(), created.room_id.clone());
        }
        Ok(created.room_id)
    }
}

#[async_trait]
impl ChannelPlugin for MatrixPlugin {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn display_name(&self) -> &str {
        "Matrix"
    }

    fn is_configured(&self, cfg: &GatewayConfig) -> bool {
        cfg.matrix.homeserver_url.is_some()
            && cfg.matrix.access_token.is_some()
            && cfg.matrix.user_id.is_some()
    }

    fn attach_ingress(&self, sink: Arc<dyn IngressSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    async fn initialize(&self, cfg: &GatewayConfig) -> Result<()> {
        let (Some(homeserver), Some(token), Some(user_id)) = (
            cfg.matrix.homeserver_url.clone(),
            cfg.matrix.access_token.clone(),
            cfg.matrix.user_id.clone(),
        ) else {
            bail!("matrix requires homeserver_url, access_token, and user_id");
        };
        let sink = self
            .sink
            .read()
            .ok()
            .and_then(|s| s.clone())
            .context("matrix ingress sink not attached")?;

        let session = Arc::new(Session {
            homeserver: homeserver.trim_end_matches('/').to_string(),
            access_token: token.expose_secret().clone(),
            user_id,
            http: reqwest::Client::new(),
        });

        // Credential check before the loop starts.
        session
            .http
            .get(format!("{}/_matrix/client/v3/account/whoami", session.homeserver))
            .bearer_auth(&session.access_token)
            .send()
            .await
            .context("matrix homeserver unreachable")?
            .error_for_status()
            .context("matrix rejected the access token")?;

        let cancel = CancellationToken::new();
        tokio::spawn(Self::run_sync_loop(
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
        info!("matrix adapter initialized");
        Ok(())
    }

    async fn handle_webhook(&self, _req: WebhookRequest) -> WebhookResponse {
        // Ingress is the sync loop; there is nothing to push here.
        WebhookResponse::ok_empty().with_body("matrix ingress uses /sync long-polling")
    }

    async fn deliver(&self, params: &DeliveryParams) -> bool {
        let Some(session) = self.session() else {
            warn!("matrix deliver: not initialized");
            return false;
        };

        let room_id = if let Some(room) = params
            .meta
            .get("room_id")
            .cloned()
            .or_else(|| params.thread_id.clone())
        {
            room
        } else if params.recipient_id.starts_with('!') {
            params.recipient_id.clone()
        } else {
            match self.direct_room(&session, &params.recipient_id).await {
                Ok(room) => room,
                Err(e) => {
                    warn!(error = %e, "matrix direct room resolution failed");
                    return false;
                },
            }
        };

        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = format!(
            "{}/_matrix/client/v3/rooms/{room_id}/send/m.room.message/{txn_id}",
            session.homeserver,
        );
        let result = session
            .http
            .put(url)
            .bearer_auth(&session.access_token)
            .json(&serde_json::json!({ "msgtype": "m.text", "body": params.text }))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = %resp.status(), "matrix send rejected");
                false
            },
            Err(e) => {
                warn!(error = %e, "matrix send failed");
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
        if let Ok(mut cache) = self.direct_rooms.write() {
            cache.clear();
        }
    }
}
