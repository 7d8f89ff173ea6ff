//! Channel adapter plugin system.
//!
//! Each messaging platform (Mattermost, Google Chat, Slack, LINE, Matrix,
//! Signal, ...) implements the [`plugin::ChannelPlugin`] trait; the
//! [`registry::ChannelRegistry`] maps channel tags to adapters; access
//! policy lives in [`gating`].

pub mod gating;
pub mod plugin;
pub mod registry;

pub use {
    gating::{AccessMode, AllowlistStatus, AllowlistStore},
    plugin::{ChannelPlugin, IngressSink, WebhookRequest, WebhookResponse},
    registry::ChannelRegistry,
};
