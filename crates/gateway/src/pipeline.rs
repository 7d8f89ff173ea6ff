//! The ingress pipeline.
//!
//! Every inbound message — webhook-pushed or produced by an adapter's
//! background loop — runs this state machine in strict order: allowlist,
//! rate limit, validation, masking, AI dispatch, delivery. The order is
//! load-bearing: blocked users must not consume strike budget, abusive
//! payloads must not dodge cooldowns by being malformed, and masking never
//! runs on a payload already known to be an injection attempt.

use std::sync::Arc;

use tracing::{error, info, warn};

use {
    omnigate_auth::audit_tag,
    omnigate_channels::{AllowlistStore, ChannelRegistry},
    omnigate_common::{DeliveryParams, IncomingMessage},
    omnigate_dispatch::{AiDispatcher, DispatchRequest},
    omnigate_filters::{detect_and_mask, validate_input},
    omnigate_ratelimit::RateLimiter,
};

/// Fixed reply for blocked injection attempts.
pub const POLICY_BLOCK_REPLY: &str =
    "Your message was blocked by the security policy. Please rephrase and try again.";

/// Fixed reply when the AI backends are unavailable. Provider errors are
/// never surfaced to end users.
pub const APOLOGY_REPLY: &str =
    "Sorry — something went wrong while processing your message. Please try again in a moment.";

/// Shared collaborators of the pipeline. The pipeline borrows these; it
/// never mutates their structural identity.
pub struct PipelineDeps {
    pub registry: Arc<ChannelRegistry>,
    pub allowlist: Arc<AllowlistStore>,
    pub rate_limiter: RateLimiter,
    pub dispatcher: Arc<AiDispatcher>,
}

/// Run one message through the full gate sequence.
pub async fn process_message(msg: IncomingMessage, deps: &PipelineDeps) {
    let user = audit_tag(&msg.sender_id);

    // 1. Allowlist gate: silent drop, no reply, no strike consumed.
    if !deps
        .allowlist
        .is_allowed(&msg.channel, &msg.sender_id, msg.group_id.as_deref())
    {
        warn!(
            event = "allowlist_denied",
            channel = %msg.channel,
            user = %user,
            "message dropped by allowlist"
        );
        return;
    }

    // 2. Rate limit: denial reason goes back to the sender.
    let decision = deps.rate_limiter.check(&msg.channel, &msg.sender_id);
    if !decision.is_allowed() {
        warn!(
            event = "rate_limit_hit",
            channel = %msg.channel,
            user = %user,
            "rate limit denial"
        );
        deliver_reply(deps, &msg, decision.reason()).await;
        return;
    }

    // 3. Validation: injections block; a bare length overrun continues with
    // the truncated text.
    let validation = validate_input(&msg.text);
    if !validation.safe {
        let threats: Vec<&str> = validation.threats.iter().map(|t| t.as_str()).collect();
        warn!(
            event = "suspicious_input",
            channel = %msg.channel,
            user = %user,
            threats = ?threats,
            "suspicious input"
        );
        if validation.has_blocking_threat() {
            deliver_reply(deps, &msg, POLICY_BLOCK_REPLY).await;
            return;
        }
    }
    let sanitized = validation.sanitized;

    // 4. Masking: the model sees the sanitized text; the masked copy is what
    // gets persisted for audit.
    let masking = detect_and_mask(&sanitized);
    if masking.detected {
        let types: Vec<&str> = masking.types.iter().map(|t| t.as_str()).collect();
        info!(channel = %msg.channel, user = %user, types = ?types, "sensitive data masked for storage");
    }

    // 5. AI dispatch.
    let mut request = DispatchRequest::for_sender(&msg.channel, &msg.sender_id, sanitized);
    if masking.detected {
        request.content_for_storage = Some(masking.masked);
    }
    let reply = match deps.dispatcher.dispatch(&request).await {
        Ok(reply) => reply.reply,
        Err(e) => {
            error!(channel = %msg.channel, user = %user, error = %e, "ai dispatch failed");
            APOLOGY_REPLY.to_string()
        },
    };

    // 6. Delivery back through the originating adapter.
    deliver_reply(deps, &msg, &reply).await;
}

/// Egress helper: resolve the adapter by channel tag and send. Failures are
/// logged, never retried.
async fn deliver_reply(deps: &PipelineDeps, msg: &IncomingMessage, text: &str) {
    let Some(adapter) = deps.registry.get(&msg.channel) else {
        warn!(channel = %msg.channel, "no adapter for reply delivery");
        return;
    };

    let params = DeliveryParams {
        recipient_id: msg.sender_id.clone(),
        text: text.to_string(),
        reply_to_id: msg.message_id.clone(),
        thread_id: msg.group_id.clone(),
        meta: msg.meta.clone(),
    };
    if !adapter.deliver(&params).await {
        warn!(
            channel = %msg.channel,
            user = %audit_tag(&msg.sender_id),
            "delivery failed"
        );
    }
}
