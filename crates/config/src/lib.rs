//! Gateway configuration: serde schema plus environment loading.
//!
//! Everything is optional except the HTTP bind; each adapter declares which
//! keys it consumes via `is_configured`, so an unconfigured adapter simply
//! never starts.

pub mod env;
pub mod schema;

pub use {
    env::load_from_env,
    schema::{
        AllowlistEntryConfig, ConfigError, GatewayConfig, GoogleChatConfig, LineConfig,
        MatrixConfig, MattermostConfig, SignalConfig, SlackConfig,
    },
};
