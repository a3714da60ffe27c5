//! Agent kind definitions
//!
//! Three kinds of external agent are driven:
//! - Arch: plans a feature and files its issues
//! - Solver: implements one issue inside the feature worktree
//! - Reviewer: reviews a solver's pull request

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of agent to invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Planning agent - breaks a feature into issues
    Arch,
    /// Implementation agent - solves one issue
    #[default]
    Solver,
    /// Review agent - reviews a pull request
    Reviewer,
}

impl AgentKind {
    /// Get all agent kinds
    pub fn all() -> &'static [AgentKind] {
        &[AgentKind::Arch, AgentKind::Solver, AgentKind::Reviewer]
    }

    /// Get the short name for this agent kind
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Arch => "arch",
            AgentKind::Solver => "solver",
            AgentKind::Reviewer => "reviewer",
        }
    }

    /// Get a description of what this agent kind does
    pub fn description(&self) -> &'static str {
        match self {
            AgentKind::Arch => "Plans a feature and files its issues",
            AgentKind::Solver => "Implements one issue inside the feature worktree",
            AgentKind::Reviewer => "Reviews a solver's pull request",
        }
    }

    /// Whether this agent kind is expected to modify the working tree
    pub fn writes_code(&self) -> bool {
        matches!(self, AgentKind::Solver)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arch" | "a" => Ok(AgentKind::Arch),
            "solver" | "solve" | "s" => Ok(AgentKind::Solver),
            "reviewer" | "review" | "r" => Ok(AgentKind::Reviewer),
            _ => Err(format!("Unknown agent kind: {}", s)),
        }
    }
}
