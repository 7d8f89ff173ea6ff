//! Input validation and sensitive-data masking.
//!
//! Two pure functions over a single string: [`validate_input`] flags
//! injection attempts and over-length messages, [`detect_and_mask`] replaces
//! personal data with fixed mask literals before anything is persisted.
//! Both are deterministic and idempotent.

pub mod mask;
pub mod validate;

pub use {
    mask::{Masking, SensitiveKind, detect_and_mask},
    validate::{MAX_MESSAGE_LENGTH, Threat, Validation, validate_input},
};
