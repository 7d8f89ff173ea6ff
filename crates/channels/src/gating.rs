//! Per-channel access policy.
//!
//! Each channel carries a mode plus user/group sets. Unknown channels deny:
//! the boot wiring seeds an entry (default open) for every registered
//! adapter, so only tags with no adapter behind them fall through to the
//! deny.

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use {
    serde::{Deserialize, Serialize},
    tracing::info,
};

use omnigate_config::AllowlistEntryConfig;

/// Access mode for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Everyone is allowed.
    #[default]
    Open,
    /// Only listed users, or members of listed groups.
    Allowlist,
    /// Nobody is allowed.
    Disabled,
}

impl AccessMode {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "allowlist" => Some(Self::Allowlist),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Allowlist => "allowlist",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ChannelAllowlist {
    mode: AccessMode,
    users: HashSet<String>,
    groups: HashSet<String>,
}

/// Snapshot of one channel's policy, for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct AllowlistStatus {
    pub channel: String,
    pub mode: &'static str,
    pub users: Vec<String>,
    pub groups: Vec<String>,
}

/// Process-wide allowlist store. Reads are the common path; admin mutation
/// serialises against them through the lock.
#[derive(Default)]
pub struct AllowlistStore {
    entries: RwLock<HashMap<String, ChannelAllowlist>>,
}

impl AllowlistStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from parsed configuration entries.
    ///
    /// Unrecognised mode strings fall back to `allowlist` — the restrictive
    /// reading of a typo.
    #[must_use]
    pub fn from_config(entries: &HashMap<String, AllowlistEntryConfig>) -> Self {
        let store = Self::new();
        for (channel, raw) in entries {
            let mode = if raw.mode.is_empty() {
                AccessMode::Open
            } else {
                AccessMode::parse(&raw.mode).unwrap_or(AccessMode::Allowlist)
            };
            let entry = ChannelAllowlist {
                mode,
                users: raw.users.iter().cloned().collect(),
                groups: raw.groups.iter().cloned().collect(),
            };
            if let Ok(mut map) = store.entries.write() {
                map.insert(channel.clone(), entry);
            }
            info!(channel, mode = mode.as_str(), "allowlist loaded");
        }
        store
    }

    /// Seed a default-open entry for a channel that has no configuration.
    /// Existing entries are left untouched.
    pub fn ensure_channel(&self, channel: &str) {
        if let Ok(mut map) = self.entries.write() {
            map.entry(channel.to_string()).or_default();
        }
    }

    /// The policy decision.
    ///
    /// Unknown channel → deny. `open` → allow. `disabled` → deny.
    /// `allowlist` → user in users, or group provided and in groups.
    #[must_use]
    pub fn is_allowed(&self, channel: &str, user_id: &str, group_id: Option<&str>) -> bool {
        let map = match self.entries.read() {
            Ok(map) => map,
            Err(_) => return false,
        };
        let Some(entry) = map.get(channel) else {
            return false;
        };
        match entry.mode {
            AccessMode::Open => true,
            AccessMode::Disabled => false,
            AccessMode::Allowlist => {
                entry.users.contains(user_id)
                    || group_id.is_some_and(|g| entry.groups.contains(g))
            },
        }
    }

    // ── Admin operations ─────────────────────────────────────────────────

    pub fn set_mode(&self, channel: &str, mode: AccessMode) {
        if let Ok(mut map) = self.entries.write() {
            map.entry(channel.to_string()).or_default().mode = mode;
        }
    }

    pub fn add_user(&self, channel: &str, user_id: &str) {
        if let Ok(mut map) = self.entries.write() {
            map.entry(channel.to_string())
                .or_default()
                .users
                .insert(user_id.to_string());
        }
    }

    pub fn remove_user(&self, channel: &str, user_id: &str) {
        if let Ok(mut map) = self.entries.write()
            && let Some(entry) = map.get_mut(channel)
        {
            entry.users.remove(user_id);
        }
    }

    #[must_use]
    pub fn status(&self, channel: &str) -> Option<AllowlistStatus> {
        let map = self.entries.read().ok()?;
        let entry = map.get(channel)?;
        let mut users: Vec<String> = entry.users.iter().cloned().collect();
        let mut groups: Vec<String> = entry.groups.iter().cloned().collect();
        users.sort();
        groups.sort();
        Some(AllowlistStatus {
            channel: channel.to_string(),
            mode: entry.mode.as_str(),
            users,
            groups,
        })
    }
}
