//! Boot wiring: adapters, shared gates, dispatcher, heartbeat, and the
//! serve/shutdown lifecycle.

use std::sync::Arc;

use {
    anyhow::{Context, Result},
    tokio::sync::Semaphore,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    omnigate_channels::{AllowlistStore, ChannelRegistry, plugin::IngressSink},
    omnigate_config::GatewayConfig,
    omnigate_dispatch::{AiDispatcher, DispatchRequest},
    omnigate_googlechat::GoogleChatPlugin,
    omnigate_heartbeat::{
        ChatFn, ChatReply, HeartbeatConfig, HeartbeatEngine, MemoryHeartbeatStore,
        scheduler::{DEFAULT_INTERVAL, spawn_heartbeat},
    },
    omnigate_line::LinePlugin,
    omnigate_matrix::MatrixPlugin,
    omnigate_mattermost::MattermostPlugin,
    omnigate_ratelimit::{RateLimitConfig, RateLimiter},
    omnigate_signal::SignalPlugin,
    omnigate_slack::SlackPlugin,
};

use crate::{
    pipeline::PipelineDeps,
    server::{self, AppState, PipelineSink},
};

/// A built (but not yet serving) gateway and its background tasks.
pub struct Gateway {
    pub state: AppState,
    pub heartbeat_engine: Arc<HeartbeatEngine>,
    sweeper: CancellationToken,
    heartbeat: CancellationToken,
}

impl Gateway {
    /// Stop background tasks and shut every adapter down.
    pub async fn shutdown(&self) {
        self.sweeper.cancel();
        self.heartbeat.cancel();
        self.state.permits.close();
        self.state.deps.registry.shutdown_all().await;
        info!("gateway shut down");
    }
}

/// Wire every component from configuration and start the adapters.
pub async fn build_gateway(cfg: GatewayConfig) -> Result<Gateway> {
    let cfg = Arc::new(cfg);

    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(MattermostPlugin::new()))?;
    registry.register(Arc::new(GoogleChatPlugin::new()))?;
    registry.register(Arc::new(SlackPlugin::new()))?;
    registry.register(Arc::new(LinePlugin::new()))?;
    registry.register(Arc::new(MatrixPlugin::new()))?;
    registry.register(Arc::new(SignalPlugin::new()))?;
    let registry = Arc::new(registry);

    let allowlist = Arc::new(AllowlistStore::from_config(&cfg.allowlists));
    for tag in registry.tags() {
        allowlist.ensure_channel(tag);
    }

    let rate_limiter = RateLimiter::new(RateLimitConfig {
        max_per_minute: cfg.rate_limit_per_minute,
        max_strikes: cfg.max_strikes,
        cooldowns_ms: cfg.strike_cooldowns_ms.clone(),
    });
    let dispatcher = Arc::new(AiDispatcher::from_config(&cfg));

    let deps = Arc::new(PipelineDeps {
        registry: Arc::clone(&registry),
        allowlist,
        rate_limiter: rate_limiter.clone(),
        dispatcher: Arc::clone(&dispatcher),
    });
    let state = AppState {
        deps,
        admin_token: cfg.admin_token.clone().map(Arc::new),
        permits: Arc::new(Semaphore::new(cfg.worker_permits)),
        config: Arc::clone(&cfg),
    };

    // Background-loop adapters need the ingress sink before they start.
    let sink: Arc<dyn IngressSink> = Arc::new(PipelineSink::new(state.clone()));
    for plugin in registry.all() {
        plugin.attach_ingress(Arc::clone(&sink));
    }

    registry.initialize_all(&cfg).await?;

    let sweeper = rate_limiter.spawn_sweeper();

    // The heartbeat runs against the in-process store until an external one
    // is wired; its model calls go through the same two-tier dispatcher.
    let chat: ChatFn = {
        let dispatcher = Arc::clone(&dispatcher);
        Arc::new(move |turn| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                let request = DispatchRequest {
                    user_id: turn.user_id,
                    session_id: turn.session_id,
                    content: turn.prompt,
                    channel: turn.channel,
                    content_for_storage: None,
                };
                let reply = dispatcher.dispatch(&request).await?;
                Ok(ChatReply {
                    text: reply.reply,
                    model: reply.model,
                })
            })
        })
    };
    let heartbeat_engine = Arc::new(HeartbeatEngine::new(
        Arc::new(MemoryHeartbeatStore::new()),
        chat,
        HeartbeatConfig::default(),
    ));
    let heartbeat = spawn_heartbeat(Arc::clone(&heartbeat_engine), DEFAULT_INTERVAL);

    Ok(Gateway {
        state,
        heartbeat_engine,
        sweeper,
        heartbeat,
    })
}

/// Build, bind, and serve until SIGINT/SIGTERM, then tear down.
pub async fn run(cfg: GatewayConfig) -> Result<()> {
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let gateway = build_gateway(cfg).await?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "gateway listening");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    server::serve(listener, gateway.state.clone(), cancel).await?;
    gateway.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_builds_with_all_adapters_registered() {
        let gateway = build_gateway(GatewayConfig::default()).await.unwrap();

        let mut tags = gateway.state.deps.registry.tags();
        tags.sort_unstable();
        assert_eq!(
            tags,
            vec!["googlechat", "line", "matrix", "mattermost", "signal", "slack"]
        );

        // Every registered channel has a seeded allowlist entry (default
        // open), and unknown tags still deny.
        assert!(gateway.state.deps.allowlist.is_allowed("slack", "anyone", None));
        assert!(!gateway.state.deps.allowlist.is_allowed("ghost", "anyone", None));

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn allowlist_config_survives_boot_wiring() {
        let mut cfg = GatewayConfig::default();
        cfg.allowlists.insert(
            "slack".into(),
            omnigate_config::AllowlistEntryConfig {
                mode: "allowlist".into(),
                users: vec!["U1".into()],
                groups: vec![],
            },
        );

        let gateway = build_gateway(cfg).await.unwrap();
        assert!(gateway.state.deps.allowlist.is_allowed("slack", "U1", None));
        assert!(!gateway.state.deps.allowlist.is_allowed("slack", "U2", None));
        gateway.shutdown().await;
    }
}
