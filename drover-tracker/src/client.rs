//! Tracker CLI client
//!
//! All tracker access goes through a single subprocess contract: run the
//! tracker CLI with `--json` style flags, read stdout, parse JSON. The
//! [`IssueTracker`] trait is the seam the scheduler depends on; tests swap
//! in an in-memory implementation.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{CreatePr, Error, Issue, PrReview, PullRequest, Result};

/// Tracker operations the scheduler relies on
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Fetch a single issue by number
    async fn get_issue(&self, number: u64) -> Result<Issue>;

    /// Find the open or merged PR whose head is the given branch, if any
    async fn find_pr_by_branch(&self, branch: &str) -> Result<Option<PullRequest>>;

    /// Fetch all reviews submitted on a PR
    async fn get_pr_reviews(&self, number: u64) -> Result<Vec<PrReview>>;

    /// Create a pull request and return it
    async fn create_pr(&self, request: &CreatePr) -> Result<PullRequest>;
}

/// Client for a `gh`-compatible tracker CLI
#[derive(Debug, Clone)]
pub struct TrackerClient {
    /// Path to the tracker executable
    bin: String,
    /// Working directory for invocations (repository checkout)
    cwd: Option<PathBuf>,
}

impl TrackerClient {
    /// Create a client using `gh` from PATH
    pub fn new() -> Self {
        Self {
            bin: "gh".to_string(),
            cwd: None,
        }
    }

    /// Use a custom tracker executable
    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    /// Run tracker commands from the given repository checkout
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Run the tracker CLI and return its stdout
    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        debug!(bin = %self.bin, ?args, "running tracker command");

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let lowered = stderr.to_lowercase();
            if lowered.contains("not found") || lowered.contains("could not resolve") {
                return Err(Error::NotFound(stderr.trim().to_string()));
            }
            return Err(Error::CommandFailed {
                command: format!("{} {}", self.bin, args.join(" ")),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IssueTracker for TrackerClient {
    async fn get_issue(&self, number: u64) -> Result<Issue> {
        let n = number.to_string();
        let stdout = self
            .run(&["issue", "view", &n, "--json", "number,title,body,state"])
            .await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    async fn find_pr_by_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        let stdout = self
            .run(&[
                "pr",
                "list",
                "--head",
                branch,
                "--state",
                "all",
                "--limit",
                "1",
                "--json",
                "number,title,state,headRefName",
            ])
            .await?;
        let mut prs: Vec<PullRequest> = serde_json::from_str(&stdout)?;
        Ok(prs.pop())
    }

    async fn get_pr_reviews(&self, number: u64) -> Result<Vec<PrReview>> {
        #[derive(serde::Deserialize)]
        struct ReviewList {
            #[serde(default)]
            reviews: Vec<PrReview>,
        }

        let n = number.to_string();
        let stdout = self.run(&["pr", "view", &n, "--json", "reviews"]).await?;
        let list: ReviewList = serde_json::from_str(&stdout)?;
        Ok(list.reviews)
    }

    async fn create_pr(&self, request: &CreatePr) -> Result<PullRequest> {
        let stdout = self
            .run(&[
                "pr",
                "create",
                "--title",
                &request.title,
                "--body",
                &request.body,
                "--base",
                &request.base,
                "--head",
                &request.head,
            ])
            .await?;

        // `pr create` prints the new PR URL; the number is its last segment.
        let number = stdout
            .trim()
            .rsplit('/')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::Parse(format!("no PR number in output: {}", stdout.trim())))?;

        Ok(PullRequest {
            number,
            title: request.title.clone(),
            state: "OPEN".to_string(),
            head_branch: request.head.clone(),
        })
    }
}
