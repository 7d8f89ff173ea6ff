//! Slack channel adapter.
//!
//! Ingress is the Events API over a request-signed webhook; egress goes
//! through `chat.postMessage`, opening a conversation first for one-to-one
//! chats.

mod plugin;

pub use plugin::SlackPlugin;
