use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn serialize_secret_opt<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8090
}

fn default_agent_timeout_ms() -> u64 {
    90_000
}

fn default_rate_limit_per_minute() -> usize {
    30
}

fn default_max_strikes() -> u32 {
    3
}

fn default_strike_cooldowns_ms() -> Vec<u64> {
    vec![30 * 60 * 1000, 60 * 60 * 1000]
}

fn default_worker_permits() -> usize {
    32
}

/// Top-level gateway configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,

    /// Simple-REST backend endpoint (Tier 2).
    pub moa_api_url: Option<String>,
    /// Signing secret for the `X-Gateway-Auth` envelope.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub moa_api_secret: Option<Secret<String>>,

    /// Enhanced-agent endpoint (Tier 1, duplex). `ws://` or `wss://`.
    pub openclaw_gateway_url: Option<String>,
    #[serde(serialize_with = "serialize_secret_opt")]
    pub openclaw_gateway_token: Option<Secret<String>>,
    /// Overall Tier 1 wall-clock deadline.
    pub openclaw_timeout_ms: u64,

    pub rate_limit_per_minute: usize,
    pub max_strikes: u32,
    pub strike_cooldowns_ms: Vec<u64>,

    /// Bearer token guarding the admin surface; admin routes are disabled
    /// when unset.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub admin_token: Option<Secret<String>>,

    /// Concurrent pipeline task cap.
    pub worker_permits: usize,

    /// Per-channel allowlists, keyed by channel tag.
    pub allowlists: HashMap<String, AllowlistEntryConfig>,

    pub mattermost: MattermostConfig,
    pub googlechat: GoogleChatConfig,
    pub slack: SlackConfig,
    pub line: LineConfig,
    pub matrix: MatrixConfig,
    pub signal: SignalConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            moa_api_url: None,
            moa_api_secret: None,
            openclaw_gateway_url: None,
            openclaw_gateway_token: None,
            openclaw_timeout_ms: default_agent_timeout_ms(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            max_strikes: default_max_strikes(),
            strike_cooldowns_ms: default_strike_cooldowns_ms(),
            admin_token: None,
            worker_permits: default_worker_permits(),
            allowlists: HashMap::new(),
            mattermost: MattermostConfig::default(),
            googlechat: GoogleChatConfig::default(),
            slack: SlackConfig::default(),
            line: LineConfig::default(),
            matrix: MatrixConfig::default(),
            signal: SignalConfig::default(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("moa_api_url", &self.moa_api_url)
            .field("moa_api_secret", &"[REDACTED]")
            .field("openclaw_gateway_url", &self.openclaw_gateway_url)
            .field("openclaw_timeout_ms", &self.openclaw_timeout_ms)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish_non_exhaustive()
    }
}

/// Raw per-channel allowlist configuration, parsed into the live store at
/// boot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowlistEntryConfig {
    /// "open", "allowlist", or "disabled".
    pub mode: String,
    pub users: Vec<String>,
    pub groups: Vec<String>,
}

// ── Per-adapter credential blocks ────────────────────────────────────────────

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MattermostConfig {
    /// Server base URL, e.g. `https://mm.example.com`.
    pub base_url: Option<String>,
    /// Bot account token for the REST egress.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub bot_token: Option<Secret<String>>,
    /// Outgoing-webhook token the platform sends with each request.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub webhook_token: Option<Secret<String>>,
    /// Trigger word stripped from inbound text, e.g. `moa`.
    pub trigger_word: Option<String>,
}

impl std::fmt::Debug for MattermostConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MattermostConfig")
            .field("base_url", &self.base_url)
            .field("bot_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleChatConfig {
    /// Service account email for the JWT assertion.
    pub service_account_email: Option<String>,
    /// PKCS#8 PEM private key of the service account.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub private_key_pem: Option<Secret<String>>,
    /// Token Google attaches to outbound bot events, checked on ingress.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub verification_token: Option<Secret<String>>,
}

impl std::fmt::Debug for GoogleChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleChatConfig")
            .field("service_account_email", &self.service_account_email)
            .field("private_key_pem", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    #[serde(serialize_with = "serialize_secret_opt")]
    pub signing_secret: Option<Secret<String>>,
    #[serde(serialize_with = "serialize_secret_opt")]
    pub bot_token: Option<Secret<String>>,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("signing_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    #[serde(serialize_with = "serialize_secret_opt")]
    pub channel_secret: Option<Secret<String>>,
    #[serde(serialize_with = "serialize_secret_opt")]
    pub channel_access_token: Option<Secret<String>>,
}

impl std::fmt::Debug for LineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConfig")
            .field("channel_secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Homeserver base URL, e.g. `https://matrix.example.org`.
    pub homeserver_url: Option<String>,
    #[serde(serialize_with = "serialize_secret_opt")]
    pub access_token: Option<Secret<String>>,
    /// Full bot user id (`@bot:example.org`), used to drop own echoes.
    pub user_id: Option<String>,
}

impl std::fmt::Debug for MatrixConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixConfig")
            .field("homeserver_url", &self.homeserver_url)
            .field("user_id", &self.user_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// signal-cli REST API base URL, e.g. `http://127.0.0.1:8080`.
    pub api_url: Option<String>,
    /// The bot's own number, used both for receive polling and to drop
    /// self-sent envelopes.
    pub number: Option<String>,
}
