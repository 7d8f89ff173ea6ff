//! The gateway host: HTTP edge, ingress pipeline, admin surface, and boot
//! wiring for every channel adapter.

pub mod admin_routes;
pub mod pipeline;
pub mod server;
pub mod services;

pub use {
    pipeline::{PipelineDeps, process_message},
    server::AppState,
    services::{Gateway, build_gateway, run},
};
