//! LINE channel adapter.
//!
//! Ingress is the Messaging API webhook, signed with a base64 HMAC of the
//! raw body. Egress prefers the short-lived reply token carried on each
//! event and falls back to a push message once the token window has passed.

mod plugin;

pub use plugin::LinePlugin;
