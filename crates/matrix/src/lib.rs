//! Matrix channel adapter.
//!
//! Ingress is the client-server `/sync` long-poll: a background loop keeps a
//! since-token, extracts text message events, and pushes them through the
//! ingress sink. The token is never persisted — a restart re-establishes one
//! with an initial sync. Egress sends `m.room.message` events, creating a
//! direct room on demand for one-to-one chats.

mod plugin;
mod sync;

pub use plugin::MatrixPlugin;
