//! Shared types and error machinery used across all omnigate crates.

pub mod error;
pub mod types;

pub use {
    error::{Error, FromMessage, Result},
    types::{DeliveryParams, IncomingMessage},
};
