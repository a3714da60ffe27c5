//! Feature and task state machine types

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::ReviewDecision;
use crate::{Error, Result};

/// Default solve attempts allowed per task
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Immutable input describing one feature run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Feature name; also names the worktree and branches
    pub name: String,
    /// Feature description
    pub description: String,
    /// Branch the feature is based on
    pub base_branch: String,
    /// Explicit issue numbers to work, unless a planning phase discovers them
    pub issues: Option<Vec<u64>>,
    /// Whether to open one aggregate PR after all tasks complete
    pub is_parent_feature: bool,
    /// Whether issues are discovered by an arch planning phase
    pub architecture_mode: bool,
}

impl FeatureSpec {
    /// Create a spec with empty description and explicit issue mode
    pub fn new(name: impl Into<String>, base_branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            base_branch: base_branch.into(),
            issues: None,
            is_parent_feature: false,
            architecture_mode: false,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the explicit issue list
    pub fn with_issues(mut self, issues: Vec<u64>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Mark as a parent feature
    pub fn as_parent(mut self) -> Self {
        self.is_parent_feature = true;
        self
    }

    /// Enable architecture mode
    pub fn with_architecture_mode(mut self) -> Self {
        self.architecture_mode = true;
        self
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Solving,
    Reviewing,
    Approved,
    Rejected,
    Completed,
}

impl TaskStatus {
    /// Short name for logs and the issue record
    pub fn name(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Solving => "solving",
            TaskStatus::Reviewing => "reviewing",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One reviewer verdict on one attempt; append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReview {
    /// Reviewer profile that produced this verdict
    pub reviewer_id: String,
    /// The verdict
    pub result: ReviewDecision,
    /// Full review text
    pub comments: String,
    /// When the review was recorded
    pub timestamp: DateTime<Utc>,
    /// PR the review was made against
    pub pr_number: Option<u64>,
}

impl TaskReview {
    /// Record an approval
    pub fn approve(reviewer_id: impl Into<String>, comments: impl Into<String>) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            result: ReviewDecision::Approve,
            comments: comments.into(),
            timestamp: Utc::now(),
            pr_number: None,
        }
    }

    /// Record a rejection
    pub fn reject(reviewer_id: impl Into<String>, comments: impl Into<String>) -> Self {
        Self {
            reviewer_id: reviewer_id.into(),
            result: ReviewDecision::Reject,
            comments: comments.into(),
            timestamp: Utc::now(),
            pr_number: None,
        }
    }

    /// Attach the reviewed PR number
    pub fn with_pr(mut self, pr_number: u64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }
}

/// One unit of work: a single issue within a feature run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTask {
    /// Issue number; unique key within a run
    pub issue_number: u64,
    /// Issue title
    pub title: String,
    /// Issue description
    pub description: String,
    /// Issue numbers that must complete before this task may start
    pub dependencies: Vec<u64>,
    /// Current status
    pub status: TaskStatus,
    /// Solve attempts so far
    pub attempts: u32,
    /// Attempts allowed before the run fails
    pub max_attempts: u32,
    /// Accumulated reviews across attempts
    pub review_history: Vec<TaskReview>,
    /// Worktree this task runs in
    pub worktree_path: Option<PathBuf>,
    /// Issue branch inside the worktree
    pub branch: Option<String>,
    /// Pull request produced by the solver
    pub pr_number: Option<u64>,
}

impl FeatureTask {
    /// Create a pending task
    pub fn new(issue_number: u64, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            issue_number,
            title: title.into(),
            description: description.into(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            review_history: Vec::new(),
            worktree_path: None,
            branch: None,
            pr_number: None,
        }
    }

    /// Set the dependency list
    pub fn with_dependencies(mut self, dependencies: Vec<u64>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Override the attempt limit
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// A task is ready when pending and every dependency resolves to a
    /// completed task in the same run. Dependencies on unknown issues are
    /// never satisfied.
    pub fn is_ready(&self, tasks: &HashMap<u64, FeatureTask>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|dep| {
                tasks
                    .get(dep)
                    .map(|t| t.status == TaskStatus::Completed)
                    .unwrap_or(false)
            })
    }

    /// Begin a solve attempt
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.status = TaskStatus::Solving;
        self.attempts
    }

    /// Whether this task has used its final attempt
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Reject a task set whose declared dependencies contain a cycle
///
/// A cyclic set would never produce a ready task and the dispatch loop would
/// stall forever, so the run fails fast before any dispatch.
pub fn validate_acyclic(tasks: &HashMap<u64, FeatureTask>) -> Result<()> {
    let graph = drover_tracker::DependencyGraph::from_pairs(
        tasks.iter().map(|(n, t)| (*n, t.dependencies.clone())),
    );

    let cycles = graph.find_cycles();
    if let Some(cycle) = cycles.first() {
        let path: Vec<String> = cycle.iter().map(|n| format!("#{}", n)).collect();
        return Err(Error::Config(format!(
            "cyclic issue dependencies: {}",
            path.join(" -> ")
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_map(tasks: Vec<FeatureTask>) -> HashMap<u64, FeatureTask> {
        tasks.into_iter().map(|t| (t.issue_number, t)).collect()
    }

    #[test]
    fn test_readiness_requires_completed_dependencies() {
        let mut tasks = task_map(vec![
            FeatureTask::new(10, "first", ""),
            FeatureTask::new(11, "second", "").with_dependencies(vec![10]),
        ]);

        assert!(tasks[&10].is_ready(&tasks));
        assert!(!tasks[&11].is_ready(&tasks));

        tasks.get_mut(&10).unwrap().status = TaskStatus::Completed;
        assert!(tasks[&11].is_ready(&tasks));
    }

    #[test]
    fn test_unknown_dependency_is_never_ready() {
        let tasks = task_map(vec![
            FeatureTask::new(11, "task", "").with_dependencies(vec![999]),
        ]);
        assert!(!tasks[&11].is_ready(&tasks));
    }

    #[test]
    fn test_non_pending_task_is_not_ready() {
        let mut tasks = task_map(vec![FeatureTask::new(10, "task", "")]);
        tasks.get_mut(&10).unwrap().status = TaskStatus::Solving;
        assert!(!tasks[&10].is_ready(&tasks));
    }

    #[test]
    fn test_attempt_accounting() {
        let mut task = FeatureTask::new(10, "task", "").with_max_attempts(2);
        assert_eq!(task.begin_attempt(), 1);
        assert_eq!(task.status, TaskStatus::Solving);
        assert!(!task.attempts_exhausted());

        assert_eq!(task.begin_attempt(), 2);
        assert!(task.attempts_exhausted());
    }

    #[test]
    fn test_validate_acyclic_accepts_dag() {
        let tasks = task_map(vec![
            FeatureTask::new(1, "a", ""),
            FeatureTask::new(2, "b", "").with_dependencies(vec![1]),
            FeatureTask::new(3, "c", "").with_dependencies(vec![1, 2]),
        ]);
        assert!(validate_acyclic(&tasks).is_ok());
    }

    #[test]
    fn test_validate_acyclic_rejects_cycle() {
        let tasks = task_map(vec![
            FeatureTask::new(1, "a", "").with_dependencies(vec![2]),
            FeatureTask::new(2, "b", "").with_dependencies(vec![1]),
        ]);

        let result = validate_acyclic(&tasks);
        match result {
            Err(Error::Config(message)) => assert!(message.contains("cyclic")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_spec_builder() {
        let spec = FeatureSpec::new("pay", "main")
            .with_description("payment flow")
            .with_issues(vec![10, 11])
            .as_parent();

        assert_eq!(spec.name, "pay");
        assert_eq!(spec.issues, Some(vec![10, 11]));
        assert!(spec.is_parent_feature);
        assert!(!spec.architecture_mode);
    }
}
