//! Admin surface: rate-limiter and allowlist operations, guarded by a
//! bearer token compared in constant time. With no token configured the
//! whole surface answers 404, indistinguishable from absent routes.

use {
    axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{delete, get, post},
    },
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::warn,
};

use {omnigate_auth::timing_safe_eq, omnigate_channels::AccessMode};

use crate::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/channels", get(list_channels))
        .route("/admin/ratelimit/stats", get(ratelimit_stats))
        .route("/admin/ratelimit/unban", post(ratelimit_unban))
        .route("/admin/ratelimit/reset", post(ratelimit_reset))
        .route("/admin/allowlist/{channel}", get(allowlist_status))
        .route("/admin/allowlist/{channel}/mode", post(allowlist_set_mode))
        .route("/admin/allowlist/{channel}/users", post(allowlist_add_user))
        .route(
            "/admin/allowlist/{channel}/users/{user}",
            delete(allowlist_remove_user),
        )
}

/// Constant-time bearer check. `None` means authorized.
fn check_admin(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let Some(expected) = &state.admin_token else {
        return Some(StatusCode::NOT_FOUND.into_response());
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if !timing_safe_eq(expected.expose_secret().as_bytes(), provided.as_bytes()) {
        warn!("admin request with bad bearer token");
        return Some(StatusCode::UNAUTHORIZED.into_response());
    }
    None
}

macro_rules! require_admin {
    ($state:expr, $headers:expr) => {
        if let Some(denied) = check_admin(&$state, &$headers) {
            return denied;
        }
    };
}

#[derive(Deserialize)]
struct KeyParams {
    channel: String,
    user_id: String,
}

async fn list_channels(State(state): State<AppState>, headers: HeaderMap) -> Response {
    require_admin!(state, headers);
    let channels: Vec<serde_json::Value> = state
        .deps
        .registry
        .all()
        .iter()
        .map(|p| {
            serde_json::json!({
                "channel": p.channel(),
                "display_name": p.display_name(),
                "configured": p.is_configured(&state.config),
                "initialized": state.deps.registry.is_initialized(p.channel()),
            })
        })
        .collect();
    Json(channels).into_response()
}

async fn ratelimit_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    require_admin!(state, headers);
    Json(state.deps.rate_limiter.stats()).into_response()
}

async fn ratelimit_unban(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<KeyParams>,
) -> Response {
    require_admin!(state, headers);
    state.deps.rate_limiter.unban(&params.channel, &params.user_id);
    Json(serde_json::json!({ "unbanned": true })).into_response()
}

async fn ratelimit_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<KeyParams>,
) -> Response {
    require_admin!(state, headers);
    state.deps.rate_limiter.reset(&params.channel, &params.user_id);
    Json(serde_json::json!({ "reset": true })).into_response()
}

async fn allowlist_status(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
) -> Response {
    require_admin!(state, headers);
    match state.deps.allowlist.status(&channel) {
        Some(status) => Json(status).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
struct ModeParams {
    mode: String,
}

async fn allowlist_set_mode(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(params): Json<ModeParams>,
) -> Response {
    require_admin!(state, headers);
    let Some(mode) = AccessMode::parse(&params.mode) else {
        return (StatusCode::BAD_REQUEST, "mode must be open, allowlist, or disabled")
            .into_response();
    };
    state.deps.allowlist.set_mode(&channel, mode);
    Json(serde_json::json!({ "channel": channel, "mode": mode.as_str() })).into_response()
}

#[derive(Deserialize)]
struct UserParams {
    user_id: String,
}

async fn allowlist_add_user(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    Json(params): Json<UserParams>,
) -> Response {
    require_admin!(state, headers);
    state.deps.allowlist.add_user(&channel, &params.user_id);
    Json(serde_json::json!({ "added": params.user_id })).into_response()
}

async fn allowlist_remove_user(
    State(state): State<AppState>,
    Path((channel, user)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    require_admin!(state, headers);
    state.deps.allowlist.remove_user(&channel, &user);
    Json(serde_json::json!({ "removed": user })).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use {
        axum::{body::Body, http::Request},
        omnigate_channels::{AllowlistStore, ChannelRegistry},
        omnigate_config::GatewayConfig,
        omnigate_dispatch::AiDispatcher,
        omnigate_ratelimit::RateLimiter,
        secrecy::Secret,
        tokio::sync::Semaphore,
        tower::ServiceExt,
    };

    use crate::{pipeline::PipelineDeps, server::router};

    use super::*;

    fn state(admin_token: Option<&str>) -> AppState {
        AppState {
            deps: Arc::new(PipelineDeps {
                registry: Arc::new(ChannelRegistry::new()),
                allowlist: Arc::new(AllowlistStore::new()),
                rate_limiter: RateLimiter::default(),
                dispatcher: Arc::new(AiDispatcher::new(None, None)),
            }),
            config: Arc::new(GatewayConfig::default()),
            admin_token: admin_token.map(|t| Arc::new(Secret::new(t.to_string()))),
            permits: Arc::new(Semaphore::new(4)),
        }
    }

    #[tokio::test]
    async fn no_admin_token_hides_the_surface() {
        let app = router(state(None));
        let response = app
            .oneshot(
                Request::get("/admin/ratelimit/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Admin ops are refused without the exact bearer token.
    #[tokio::test]
    async fn security_wrong_bearer_is_401() {
        let app = router(state(Some("admintok")));
        let response = app
            .oneshot(
                Request::get("/admin/ratelimit/stats")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stats_and_allowlist_ops_roundtrip() {
        let s = state(Some("admintok"));
        s.deps.allowlist.ensure_channel("slack");
        let app = router(s.clone());

        let response = app
            .clone()
            .oneshot(
                Request::get("/admin/ratelimit/stats")
                    .header("authorization", "Bearer admintok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/allowlist/slack/mode")
                    .header("authorization", "Bearer admintok")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"allowlist"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::post("/admin/allowlist/slack/users")
                    .header("authorization", "Bearer admintok")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"user_id":"alice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(s.deps.allowlist.is_allowed("slack", "alice", None));

        let response = app
            .oneshot(
                Request::delete("/admin/allowlist/slack/users/alice")
                    .header("authorization", "Bearer admintok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!s.deps.allowlist.is_allowed("slack", "alice", None));
    }

    #[tokio::test]
    async fn bad_mode_is_rejected() {
        let app = router(state(Some("admintok")));
        let response = app
            .oneshot(
                Request::post("/admin/allowlist/slack/mode")
                    .header("authorization", "Bearer admintok")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"mode":"everyone"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
