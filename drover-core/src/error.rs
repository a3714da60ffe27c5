//! Error types for Drover

use thiserror::Error;

/// Result type alias for Drover operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Drover operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Agent subprocess failure: non-zero exit, empty output or spawn error
    #[error("Agent error: {0}")]
    Agent(String),

    /// Agent subprocess exceeded its hard timeout and was killed
    #[error("Agent timed out after {0} seconds")]
    AgentTimeout(u64),

    /// Git command failure other than a merge conflict
    #[error("Git error: {0}")]
    Git(String),

    /// A merge stopped on conflicts; carries the conflicting paths
    #[error("Merge conflict in {} file(s)", files.len())]
    MergeConflict { files: Vec<String> },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracker CLI failure
    #[error("Tracker error: {0}")]
    Tracker(#[from] drover_tracker::Error),

    /// State store failure
    #[error("State error: {0}")]
    State(#[from] drover_state::Error),

    /// A task failed in a way that aborts the run
    #[error("Task for issue #{issue} failed: {reason}")]
    TaskFailed { issue: u64, reason: String },

    /// A task was rejected on its final allowed attempt
    #[error("Issue #{issue} exhausted {attempts} attempts without approval")]
    RetriesExhausted { issue: u64, attempts: u32 },

    /// The run was interrupted from outside
    #[error("Run interrupted")]
    Interrupted,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
