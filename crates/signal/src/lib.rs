//! Signal channel adapter (signal-cli REST API).
//!
//! Ingress is a fixed-period poll of the receive endpoint; egress is a
//! single send call. The webhook handler exists only to explain itself.

mod plugin;

pub use plugin::SignalPlugin;
