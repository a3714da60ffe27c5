//! Error types for tracker operations

use thiserror::Error;

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tracker operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error spawning or reading the tracker CLI
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON from the tracker CLI did not parse
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The tracker CLI exited non-zero
    #[error("tracker command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A referenced issue or PR does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The tracker output was structurally valid but missing expected data
    #[error("unexpected tracker output: {0}")]
    Parse(String),
}
