//! Error types for the state store

use thiserror::Error;

/// Result type alias for state operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for state operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error reading or writing the state file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// State file serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// State file schema version is not one this build understands
    #[error("unsupported state schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
}
