//! Drover Core - orchestration of agent-driven feature development
//!
//! Drover expands a feature spec into dependency-ordered issue tasks, runs an
//! external code agent against each in an isolated git worktree, gates
//! completion on unanimous reviewer approval, and retries rejected work with
//! synthesized feedback.

pub mod agent;
pub mod config;
pub mod error;
pub mod feedback;
pub mod git;
pub mod procs;
pub mod scheduler;
pub mod worktree;

pub use agent::{AgentInvoker, AgentKind, AgentOutput, AgentRunner, OutputSink};
pub use config::{AgentConfig, Config, SchedulerConfig, WorktreeConfig};
pub use error::{Error, Result};
pub use procs::ProcessRegistry;
pub use scheduler::{FeatureSpec, FeatureTask, TaskGraphScheduler, TaskReview, TaskStatus};
pub use worktree::WorktreeLifecycleManager;
