//! Environment-variable loader.
//!
//! Gateway keys use the `OMNIGATE_` prefix; adapter credentials use their
//! platform prefix; allowlists use `ALLOWLIST_<CHANNEL>_MODE/USERS/GROUPS`.

use std::collections::HashMap;

use secrecy::Secret;

use crate::schema::{AllowlistEntryConfig, ConfigError, GatewayConfig};

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn secret(key: &str) -> Option<Secret<String>> {
    var(key).map(Secret::new)
}

fn parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
    }
}

fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Collect `ALLOWLIST_<CHANNEL>_*` triplets from the environment.
fn load_allowlists() -> HashMap<String, AllowlistEntryConfig> {
    let mut out: HashMap<String, AllowlistEntryConfig> = HashMap::new();
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix("ALLOWLIST_") else {
            continue;
        };
        let Some((channel, field)) = rest.rsplit_once('_') else {
            continue;
        };
        if channel.is_empty() || value.trim().is_empty() {
            continue;
        }
        let entry = out.entry(channel.to_lowercase()).or_default();
        match field {
            "MODE" => entry.mode = value.trim().to_lowercase(),
            "USERS" => entry.users = csv(&value),
            "GROUPS" => entry.groups = csv(&value),
            _ => {},
        }
    }
    out
}

/// Build a [`GatewayConfig`] from the process environment.
pub fn load_from_env() -> Result<GatewayConfig, ConfigError> {
    let mut cfg = GatewayConfig::default();

    if let Some(host) = var("OMNIGATE_HOST") {
        cfg.host = host;
    }
    if let Some(port) = parse::<u16>("OMNIGATE_PORT")? {
        cfg.port = port;
    }

    cfg.moa_api_url = var("MOA_API_URL");
    cfg.moa_api_secret = secret("MOA_API_SECRET");

    cfg.openclaw_gateway_url = var("OPENCLAW_GATEWAY_URL");
    cfg.openclaw_gateway_token = secret("OPENCLAW_GATEWAY_TOKEN");
    if let Some(ms) = parse::<u64>("OPENCLAW_TIMEOUT_MS")? {
        cfg.openclaw_timeout_ms = ms;
    }

    if let Some(n) = parse::<usize>("OMNIGATE_RATE_LIMIT_PER_MINUTE")? {
        cfg.rate_limit_per_minute = n;
    }
    if let Some(n) = parse::<u32>("OMNIGATE_MAX_STRIKES")? {
        cfg.max_strikes = n;
    }
    if let Some(raw) = var("OMNIGATE_STRIKE_COOLDOWN_MS") {
        let mut cooldowns = Vec::new();
        for part in csv(&raw) {
            let ms = part.parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "OMNIGATE_STRIKE_COOLDOWN_MS",
                reason: e.to_string(),
            })?;
            cooldowns.push(ms);
        }
        if !cooldowns.is_empty() {
            cfg.strike_cooldowns_ms = cooldowns;
        }
    }

    cfg.admin_token = secret("OMNIGATE_ADMIN_TOKEN");
    if let Some(n) = parse::<usize>("OMNIGATE_WORKER_PERMITS")? {
        cfg.worker_permits = n;
    }

    cfg.allowlists = load_allowlists();

    cfg.mattermost.base_url = var("MATTERMOST_BASE_URL");
    cfg.mattermost.bot_token = secret("MATTERMOST_BOT_TOKEN");
    cfg.mattermost.webhook_token = secret("MATTERMOST_WEBHOOK_TOKEN");
    cfg.mattermost.trigger_word = var("MATTERMOST_TRIGGER_WORD");

    cfg.googlechat.service_account_email = var("GOOGLECHAT_SERVICE_ACCOUNT_EMAIL");
    cfg.googlechat.private_key_pem = secret("GOOGLECHAT_PRIVATE_KEY_PEM");
    cfg.googlechat.verification_token = secret("GOOGLECHAT_VERIFICATION_TOKEN");

    cfg.slack.signing_secret = secret("SLACK_SIGNING_SECRET");
    cfg.slack.bot_token = secret("SLACK_BOT_TOKEN");

    cfg.line.channel_secret = secret("LINE_CHANNEL_SECRET");
    cfg.line.channel_access_token = secret("LINE_CHANNEL_ACCESS_TOKEN");

    cfg.matrix.homeserver_url = var("MATRIX_HOMESERVER_URL");
    cfg.matrix.access_token = secret("MATRIX_ACCESS_TOKEN");
    cfg.matrix.user_id = var("MATRIX_USER_ID");

    cfg.signal.api_url = var("SIGNAL_API_URL");
    cfg.signal.number = var("SIGNAL_NUMBER");

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splits_and_trims() {
        assert_eq!(csv("a, b ,c,,"), vec!["a", "b", "c"]);
        assert!(csv(" ").is_empty());
    }

    // Env-mutating tests are serialised by running them in one test body;
    // `std::env::set_var` is process-global.
    #[test]
    #[allow(unsafe_code)]
    fn load_reads_gateway_and_allowlist_keys() {
        unsafe {
            std::env::set_var("OMNIGATE_PORT", "9999");
            std::env::set_var("MOA_API_URL", "https://backend.example.com");
            std::env::set_var("ALLOWLIST_MATTERMOST_MODE", "allowlist");
            std::env::set_var("ALLOWLIST_MATTERMOST_USERS", "U1,U2");
            std::env::set_var("ALLOWLIST_MATTERMOST_GROUPS", "C1");
        }

        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.moa_api_url.as_deref(), Some("https://backend.example.com"));

        let entry = cfg.allowlists.get("mattermost").unwrap();
        assert_eq!(entry.mode, "allowlist");
        assert_eq!(entry.users, vec!["U1", "U2"]);
        assert_eq!(entry.groups, vec!["C1"]);

        unsafe {
            std::env::remove_var("MOA_API_URL");
            std::env::remove_var("ALLOWLIST_MATTERMOST_MODE");
            std::env::remove_var("ALLOWLIST_MATTERMOST_USERS");
            std::env::remove_var("ALLOWLIST_MATTERMOST_GROUPS");
        }

        // Invalid numeric values surface as ConfigError rather than panics.
        unsafe {
            std::env::set_var("OMNIGATE_PORT", "not-a-port");
        }
        assert!(load_from_env().is_err());
        unsafe {
            std::env::remove_var("OMNIGATE_PORT");
        }
    }
}
