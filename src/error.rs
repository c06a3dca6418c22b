//! # Link Error Handling
//!
//! This module defines the LinkError enum, which represents the different
//! error types that can occur while driving the radio backends and link
//! modes.

use thiserror::Error;

/// Represents the different error types that can occur in this crate.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The radio backend is not connected (or its actor has shut down).
    #[error("radio not connected")]
    NotConnected,

    /// A link mode was asked to start while already running.
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    /// The chip behind the SPI bus did not identify as an SX1276.
    #[error("unexpected chip version 0x{0:02X} (expected 0x12)")]
    InvalidChip(u8),

    /// An SPI, GPIO or serial transfer failed.
    #[error("I/O error during {op}: {detail}")]
    Io { op: &'static str, detail: String },

    /// An operation did not complete within its deadline.
    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    /// A parameter was outside its permitted range.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// A hex payload string could not be decoded.
    #[error("invalid hex payload: {0}")]
    InvalidHex(String),

    /// A resource (modem command slot, radio) is occupied.
    #[error("resource busy: {0}")]
    ResourceBusy(&'static str),
}

impl LinkError {
    /// Shorthand for I/O errors carrying the failing operation name.
    pub fn io(op: &'static str, detail: impl ToString) -> Self {
        LinkError::Io {
            op,
            detail: detail.to_string(),
        }
    }
}
