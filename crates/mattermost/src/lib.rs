//! Mattermost channel adapter.
//!
//! Ingress is an outgoing webhook: the server POSTs every message matching a
//! trigger word. Egress goes through the REST API with a bot account token;
//! one-to-one chats resolve through direct-channel creation.

mod plugin;

pub use plugin::MattermostPlugin;
