//! Per-(channel, user) sliding-window rate limiting with strike escalation.
//!
//! Each key owns a bucket of request timestamps inside a 60-second window.
//! Saturating the window earns a strike and a cooldown; the third strike is a
//! permanent ban that only an explicit admin unban clears. Bucket state is
//! in-memory only — a restart forgets strikes, and re-offenders simply
//! re-accumulate them.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    dashmap::DashMap,
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// Window length for the sliding counter.
const WINDOW_MS: u64 = 60_000;

/// Buckets idle longer than this are swept (unless blocked or banned).
const IDLE_EXPIRY_MS: u64 = 2 * 60 * 60 * 1000;

/// Sweep cadence.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Limiter tuning knobs.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per sliding 60-second window.
    pub max_per_minute: usize,
    /// Strikes before a permanent ban.
    pub max_strikes: u32,
    /// Cooldown per strike; the final entry is unused (the last strike bans).
    pub cooldowns_ms: Vec<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 30,
            max_strikes: 3,
            cooldowns_ms: vec![30 * 60 * 1000, 60 * 60 * 1000],
        }
    }
}

#[derive(Debug, Default)]
struct RateBucket {
    /// Request timestamps (ms) inside the current window, oldest first.
    timestamps: Vec<u64>,
    strikes: u32,
    /// 0 = not blocked.
    blocked_until: u64,
    banned: bool,
    /// Last time this bucket saw any activity, for the idle sweep.
    last_seen: u64,
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        remaining: usize,
        reset_in_ms: u64,
    },
    Denied {
        reason: String,
        /// `None` means permanent (banned).
        retry_in_ms: Option<u64>,
    },
}

impl RateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// User-facing denial text, empty for allowed decisions.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Allowed { .. } => "",
            Self::Denied { reason, .. } => reason,
        }
    }
}

/// Aggregate counters for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub users: usize,
    pub banned_users: usize,
    pub blocked_users: usize,
}

/// The process-wide limiter. Cheap to clone; all clones share buckets.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Arc<DashMap<String, RateBucket>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(DashMap::new()),
        }
    }

    fn key(channel: &str, user_id: &str) -> String {
        format!("{channel}:{user_id}")
    }

    /// Check whether a request from `(channel, user_id)` may proceed.
    ///
    /// Evaluation order: permanent ban, active cooldown, window prune,
    /// saturation (strike escalation), then admit. The whole mutation runs
    /// under the bucket's entry lock, so concurrent checks for one key
    /// serialise while distinct keys proceed in parallel.
    pub fn check(&self, channel: &str, user_id: &str) -> RateDecision {
        self.check_at(channel, user_id, now_ms())
    }

    fn check_at(&self, channel: &str, user_id: &str, now: u64) -> RateDecision {
        let key = Self::key(channel, user_id);
        let mut bucket = self.buckets.entry(key).or_default();
        bucket.last_seen = now;

        if bucket.banned {
            return RateDecision::Denied {
                reason: "You have been permanently blocked due to repeated rate limit violations."
                    .into(),
                retry_in_ms: None,
            };
        }

        if now < bucket.blocked_until {
            let remaining_ms = bucket.blocked_until - now;
            let minutes = remaining_ms.div_ceil(60_000);
            return RateDecision::Denied {
                reason: format!("Too many requests. Try again in {minutes} minute(s)."),
                retry_in_ms: Some(remaining_ms),
            };
        }

        let cutoff = now.saturating_sub(WINDOW_MS);
        bucket.timestamps.retain(|&ts| ts > cutoff);

        if bucket.timestamps.len() >= self.config.max_per_minute {
            bucket.strikes += 1;

            if bucket.strikes >= self.config.max_strikes {
                bucket.banned = true;
                info!(channel, strikes = bucket.strikes, "rate limit: permanent ban");
                return RateDecision::Denied {
                    reason: "You have been permanently blocked due to repeated rate limit violations."
                        .into(),
                    retry_in_ms: None,
                };
            }

            let idx = (bucket.strikes - 1) as usize;
            let cooldown = self
                .config
                .cooldowns_ms
                .get(idx)
                .copied()
                .or_else(|| self.config.cooldowns_ms.last().copied())
                .unwrap_or(WINDOW_MS);
            bucket.blocked_until = now + cooldown;

            let minutes = cooldown / 60_000;
            return RateDecision::Denied {
                reason: format!(
                    "Rate limit exceeded. Cooling down for {minutes} minute(s) (strike {} of {}).",
                    bucket.strikes, self.config.max_strikes
                ),
                retry_in_ms: Some(cooldown),
            };
        }

        bucket.timestamps.push(now);
        let remaining = self.config.max_per_minute - bucket.timestamps.len();
        let reset_in_ms = bucket
            .timestamps
            .first()
            .map(|&oldest| WINDOW_MS.saturating_sub(now - oldest))
            .unwrap_or(WINDOW_MS);

        RateDecision::Allowed {
            remaining,
            reset_in_ms,
        }
    }

    /// Wipe a bucket entirely.
    pub fn reset(&self, channel: &str, user_id: &str) {
        self.buckets.remove(&Self::key(channel, user_id));
    }

    /// Clear a ban and all escalation state, preserving the bucket.
    pub fn unban(&self, channel: &str, user_id: &str) {
        if let Some(mut bucket) = self.buckets.get_mut(&Self::key(channel, user_id)) {
            bucket.banned = false;
            bucket.strikes = 0;
            bucket.blocked_until = 0;
            bucket.timestamps.clear();
        }
    }

    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let now = now_ms();
        let mut banned = 0;
        let mut blocked = 0;
        for entry in self.buckets.iter() {
            if entry.banned {
                banned += 1;
            } else if now < entry.blocked_until {
                blocked += 1;
            }
        }
        RateLimiterStats {
            users: self.buckets.len(),
            banned_users: banned,
            blocked_users: blocked,
        }
    }

    /// Drop buckets idle for over two hours that are neither blocked nor
    /// banned. Banned buckets persist until an explicit admin unban.
    pub fn sweep(&self) {
        self.sweep_at(now_ms());
    }

    fn sweep_at(&self, now: u64) {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.banned
                || bucket.blocked_until >= now
                || now.saturating_sub(bucket.last_seen) <= IDLE_EXPIRY_MS
        });
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "rate limiter sweep");
        }
    }

    /// Spawn the periodic sweep task. Cancel the returned token to stop it.
    pub fn spawn_sweeper(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let limiter = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => limiter.sweep(),
                }
            }
        });
        cancel
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
