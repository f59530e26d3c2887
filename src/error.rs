//! Error types for emurdb
//!
//! Provides a unified error type for codec, transport and protocol operations.

use thiserror::Error;

/// Result type alias using RdbError
pub type Result<T> = std::result::Result<T, RdbError>;

/// Unified error type for emurdb operations
#[derive(Debug, Error)]
pub enum RdbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Invalid hex value: {0:?}")]
    InvalidHex(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Protocol mismatch: remote {remote:#x}, local {local:#x}")]
    ProtocolMismatch { remote: u32, local: u32 },

    #[error("Not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
