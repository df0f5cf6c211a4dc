//! Error types for the opt-out store
//!
//! Provides a unified error type for all fallible operations.
//!
//! Contract violations on the in-memory structures (undersized buffers,
//! non-positive capacities) are not represented here: they panic.

use thiserror::Error;

/// Result type alias using OptOutError
pub type Result<T> = std::result::Result<T, OptOutError>;

/// Unified error type for opt-out store operations
#[derive(Debug, Error)]
pub enum OptOutError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Cloud Storage Errors
    // -------------------------------------------------------------------------
    /// A list/download/upload/delete call on the cloud collaborator failed
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // File Errors
    // -------------------------------------------------------------------------
    #[error("Invalid opt-out file name: {0}")]
    InvalidFileName(String),

    /// File contents that cannot be decoded as a run of entries
    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
