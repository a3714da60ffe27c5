//! Persisted record types for the five state collections

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on retained agent log lines
pub const MAX_AGENT_LOG_LINES: usize = 1000;

/// Lifecycle status of an agent subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Observable status of one agent invocation
///
/// Created when the subprocess is spawned, updated on output and exit,
/// never deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Unique agent id within the store
    pub id: String,
    /// Agent kind: "arch", "solver" or "reviewer"
    pub kind: String,
    /// Current lifecycle status
    pub status: AgentRunStatus,
    /// Feature this agent is working on
    pub feature_name: Option<String>,
    /// Issue this agent is working on
    pub issue_number: Option<u64>,
    /// When the subprocess started
    pub start_time: Option<DateTime<Utc>>,
    /// When the subprocess exited
    pub end_time: Option<DateTime<Utc>>,
    /// Output lines, bounded to the most recent [`MAX_AGENT_LOG_LINES`]
    pub logs: Vec<String>,
    /// Failure description, if the agent failed
    pub error: Option<String>,
}

impl AgentStatus {
    /// Create a new idle agent record
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            status: AgentRunStatus::Idle,
            feature_name: None,
            issue_number: None,
            start_time: None,
            end_time: None,
            logs: Vec::new(),
            error: None,
        }
    }

    /// Attach the feature this agent works on
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature_name = Some(feature.into());
        self
    }

    /// Attach the issue this agent works on
    pub fn with_issue(mut self, issue: u64) -> Self {
        self.issue_number = Some(issue);
        self
    }

    /// Mark the agent as running, stamping the start time
    pub fn start(&mut self) {
        self.status = AgentRunStatus::Running;
        self.start_time = Some(Utc::now());
    }

    /// Mark the agent as completed, stamping the end time
    pub fn complete(&mut self) {
        self.status = AgentRunStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// Mark the agent as failed with a reason
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AgentRunStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Append an output line, dropping the oldest beyond the bound
    pub fn append_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
        if self.logs.len() > MAX_AGENT_LOG_LINES {
            let excess = self.logs.len() - MAX_AGENT_LOG_LINES;
            self.logs.drain(..excess);
        }
    }
}

/// Run status of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

/// One orchestrated feature run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Feature name (collection key)
    pub name: String,
    /// Feature description
    pub description: String,
    /// Branch the feature is based on
    pub base_branch: String,
    /// Current run status
    pub status: FeatureStatus,
    /// When the run started
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl FeatureRecord {
    /// Create a running feature record
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: description.into(),
            base_branch: base_branch.into(),
            status: FeatureStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the feature run completed
    pub fn mark_completed(&mut self) {
        self.status = FeatureStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Mark the feature run failed
    pub fn mark_failed(&mut self) {
        self.status = FeatureStatus::Failed;
        self.updated_at = Utc::now();
    }
}

/// Observable state of one scheduled issue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    /// Issue number (collection key)
    pub number: u64,
    /// Feature the issue belongs to
    pub feature_name: String,
    /// Issue title
    pub title: String,
    /// Task status name ("pending", "solving", ...)
    pub status: String,
    /// Solve attempts so far
    pub attempts: u32,
    /// Pull request opened for this issue, if any
    pub pr_number: Option<u64>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl IssueRecord {
    /// Create a pending issue record
    pub fn new(number: u64, feature_name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            number,
            feature_name: feature_name.into(),
            title: title.into(),
            status: "pending".to_string(),
            attempts: 0,
            pr_number: None,
            updated_at: Utc::now(),
        }
    }
}

/// Lifecycle status of a worktree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStatus {
    #[default]
    Active,
    Stale,
    Archived,
}

/// A managed worktree directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    /// Worktree name (collection key)
    pub name: String,
    /// Filesystem path of the worktree
    pub path: String,
    /// Branch the worktree is bound to
    pub branch: String,
    /// Feature sharing this worktree
    pub feature_name: String,
    /// Current status
    pub status: WorktreeStatus,
    /// When the worktree was created
    pub created_at: DateTime<Utc>,
}

impl WorktreeRecord {
    /// Create an active worktree record
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        branch: impl Into<String>,
        feature_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            branch: branch.into(),
            feature_name: feature_name.into(),
            status: WorktreeStatus::Active,
            created_at: Utc::now(),
        }
    }
}

/// An API session created and validated by the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id (collection key)
    pub id: String,
    /// Bearer token
    pub token: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Last time the session was used
    pub last_access: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a fresh session with random id and token
    pub fn generate() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            last_access: now,
        }
    }

    /// Whether the session has been idle longer than `max_age`
    pub fn is_expired(&self, max_age: std::time::Duration) -> bool {
        let idle = Utc::now().signed_duration_since(self.last_access);
        idle.to_std().map(|d| d > max_age).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_lifecycle() {
        let mut agent = AgentStatus::new("solver-10", "solver")
            .with_feature("pay")
            .with_issue(10);
        assert_eq!(agent.status, AgentRunStatus::Idle);

        agent.start();
        assert_eq!(agent.status, AgentRunStatus::Running);
        assert!(agent.start_time.is_some());

        agent.fail("exit code 1");
        assert_eq!(agent.status, AgentRunStatus::Failed);
        assert_eq!(agent.error.as_deref(), Some("exit code 1"));
        assert!(agent.end_time.is_some());
    }

    #[test]
    fn test_agent_log_bound() {
        let mut agent = AgentStatus::new("a", "solver");
        for i in 0..(MAX_AGENT_LOG_LINES + 25) {
            agent.append_log(format!("line {}", i));
        }
        assert_eq!(agent.logs.len(), MAX_AGENT_LOG_LINES);
        assert_eq!(agent.logs[0], "line 25");
    }

    #[test]
    fn test_feature_record_transitions() {
        let mut feature = FeatureRecord::new("pay", "payments", "main");
        assert_eq!(feature.status, FeatureStatus::Running);
        feature.mark_completed();
        assert_eq!(feature.status, FeatureStatus::Completed);
    }

    #[test]
    fn test_session_expiry() {
        let mut session = SessionRecord::generate();
        assert!(!session.is_expired(std::time::Duration::from_secs(60)));

        session.last_access = Utc::now() - chrono::Duration::hours(25);
        assert!(session.is_expired(std::time::Duration::from_secs(24 * 3600)));
    }

    #[test]
    fn test_generated_sessions_unique() {
        let a = SessionRecord::generate();
        let b = SessionRecord::generate();
        assert_ne!(a.id, b.id);
        assert_ne!(a.token, b.token);
    }
}
