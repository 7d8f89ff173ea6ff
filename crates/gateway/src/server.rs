//! HTTP edge: webhook ingress, health, and the admin surface.

use std::sync::Arc;

use {
    async_trait::async_trait,
    axum::{
        Router,
        body::Bytes,
        extract::{Path, State},
        http::{HeaderMap, Method, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    secrecy::Secret,
    tokio::sync::Semaphore,
    tracing::{debug, warn},
};

use {
    omnigate_channels::plugin::{IngressSink, WebhookRequest},
    omnigate_common::IncomingMessage,
    omnigate_config::GatewayConfig,
};

use crate::{admin_routes, pipeline::PipelineDeps};

/// Shared state for every route handler.
#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<PipelineDeps>,
    pub config: Arc<GatewayConfig>,
    pub admin_token: Option<Arc<Secret<String>>>,
    /// Caps concurrent pipeline tasks during bursts.
    pub permits: Arc<Semaphore>,
}

impl AppState {
    /// Start one pipeline task for an inbound message, bounded by the
    /// worker permit pool.
    pub fn spawn_pipeline(&self, msg: IncomingMessage) {
        let deps = Arc::clone(&self.deps);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire().await else {
                // Semaphore closed: we are shutting down.
                return;
            };
            crate::pipeline::process_message(msg, &deps).await;
        });
    }
}

/// The ingress sink handed to polling and long-poll adapters: every message
/// their background loops produce becomes an independent pipeline task.
pub struct PipelineSink {
    state: AppState,
}

impl PipelineSink {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl IngressSink for PipelineSink {
    async fn accept(&self, msg: IncomingMessage) {
        self.state.spawn_pipeline(msg);
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/{channel}", post(webhook_handler))
        .route("/healthz", get(healthz))
        .merge(admin_routes::router())
        .with_state(state)
}

/// `POST /webhook/{channel}`: hand the raw request to the adapter, echo its
/// status and body verbatim, then feed any decoded messages to the pipeline.
/// The platform gets its acknowledgement before AI dispatch begins.
async fn webhook_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(adapter) = state.deps.registry.get(&channel) else {
        debug!(channel, "webhook for unknown channel");
        return (StatusCode::NOT_FOUND, "unknown channel").into_response();
    };

    let mut req = WebhookRequest::new(format!("/webhook/{channel}"), method.to_string(), body.to_vec());
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            req.headers.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }

    let resp = adapter.handle_webhook(req).await;
    for msg in resp.messages {
        state.spawn_pipeline(msg);
    }

    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match resp.body {
        Some(body) => (status, body).into_response(),
        None => status.into_response(),
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    let stats = state.deps.rate_limiter.stats();
    let body = serde_json::json!({
        "status": "ok",
        "channels": state.deps.registry.tags().len(),
        "rate_limiter": stats,
    });
    axum::Json(body).into_response()
}

/// Serve until the cancellation token fires, then stop accepting and let
/// in-flight requests finish.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            warn!("http edge shutting down");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use {
        anyhow::Result,
        axum::body::Body,
        axum::http::Request,
        omnigate_channels::{
            AllowlistStore, ChannelRegistry,
            plugin::{ChannelPlugin, WebhookResponse},
        },
        omnigate_common::DeliveryParams,
        omnigate_dispatch::AiDispatcher,
        omnigate_ratelimit::RateLimiter,
        tower::ServiceExt,
    };

    struct EchoAdapter;

    #[async_trait]
    impl ChannelPlugin for EchoAdapter {
        fn channel(&self) -> &'static str {
            "echo"
        }

        fn display_name(&self) -> &str {
            "Echo"
        }

        fn is_configured(&self, _cfg: &GatewayConfig) -> bool {
            true
        }

        async fn initialize(&self, _cfg: &GatewayConfig) -> Result<()> {
            Ok(())
        }

        async fn handle_webhook(&self, req: WebhookRequest) -> WebhookResponse {
            if req.body_str().contains("bad") {
                return WebhookResponse::unauthorized();
            }
            WebhookResponse::ok_empty().with_body(format!("echo:{}", req.body_str()))
        }

        async fn deliver(&self, _params: &DeliveryParams) -> bool {
            true
        }

        async fn shutdown(&self) {}
    }

    fn state() -> AppState {
        let mut registry = ChannelRegistry::new();
        registry.register(Arc::new(EchoAdapter)).unwrap();
        AppState {
            deps: Arc::new(PipelineDeps {
                registry: Arc::new(registry),
                allowlist: Arc::new(AllowlistStore::new()),
                rate_limiter: RateLimiter::default(),
                dispatcher: Arc::new(AiDispatcher::new(None, None)),
            }),
            config: Arc::new(GatewayConfig::default()),
            admin_token: None,
            permits: Arc::new(Semaphore::new(4)),
        }
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn webhook_routes_to_the_adapter_and_echoes_its_response() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::post("/webhook/echo")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "echo:payload");
    }

    #[tokio::test]
    async fn adapter_status_is_passed_through_verbatim() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::post("/webhook/echo")
                    .body(Body::from("bad signature"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_channel_is_404() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::post("/webhook/nowhere")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn healthz_reports_channel_and_limiter_state() {
        let app = router(state());
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["channels"], 1);
    }
}
