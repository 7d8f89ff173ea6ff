//! Google Chat channel adapter.
//!
//! Ingress is the Chat bot webhook (verified with the bot's verification
//! token); egress uses the Chat REST API with a short-lived access token
//! minted from service-account credentials.

mod plugin;
mod token;

pub use {plugin::GoogleChatPlugin, token::TokenMinter};
