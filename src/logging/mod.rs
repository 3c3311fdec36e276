//! Masked structured logging: the redaction engine and the subscriber setup.

pub mod mask;
pub mod telemetry;

pub use mask::{DEFAULT_SENSITIVE_FIELDS, MASK_MARKER, Masker};
