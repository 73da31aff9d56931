//! Shared helpers

pub mod serde_hex;
