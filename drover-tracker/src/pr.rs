//! Pull request and review wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pull request as returned by `<tracker> pr view/list --json ...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number
    pub number: u64,
    /// PR title
    #[serde(default)]
    pub title: String,
    /// Current state (OPEN, CLOSED, MERGED)
    #[serde(default)]
    pub state: String,
    /// Head branch name
    #[serde(default, rename = "headRefName")]
    pub head_branch: String,
}

/// Review state attached to a PR review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

impl ReviewState {
    /// Whether this review approves the change
    pub fn is_approved(&self) -> bool {
        matches!(self, ReviewState::Approved)
    }

    /// Whether this review blocks the change
    pub fn is_blocking(&self) -> bool {
        matches!(self, ReviewState::ChangesRequested)
    }
}

/// A single review on a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrReview {
    /// Review author
    #[serde(default, deserialize_with = "author_login")]
    pub author: String,
    /// Review state
    pub state: ReviewState,
    /// Review body text
    #[serde(default)]
    pub body: String,
    /// When the review was submitted
    #[serde(default, rename = "submittedAt")]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// The tracker nests the author as `{"login": "..."}`; flatten it to a string.
fn author_login<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Author {
        #[serde(default)]
        login: String,
    }

    let author = Option::<Author>::deserialize(deserializer)?;
    Ok(author.map(|a| a.login).unwrap_or_default())
}

/// Parameters for creating a pull request
#[derive(Debug, Clone)]
pub struct CreatePr {
    /// PR title
    pub title: String,
    /// PR body
    pub body: String,
    /// Base branch to merge into
    pub base: String,
    /// Head branch carrying the changes
    pub head: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pr_json() {
        let json = r#"{"number":12,"title":"Fix","state":"OPEN","headRefName":"feature/pay-issue-10"}"#;
        let pr: PullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pr.number, 12);
        assert_eq!(pr.head_branch, "feature/pay-issue-10");
    }

    #[test]
    fn test_parse_review_with_author() {
        let json = r#"{"author":{"login":"alice"},"state":"CHANGES_REQUESTED","body":"must fix the null check","submittedAt":"2025-03-01T12:00:00Z"}"#;
        let review: PrReview = serde_json::from_str(json).unwrap();
        assert_eq!(review.author, "alice");
        assert!(review.state.is_blocking());
        assert!(review.submitted_at.is_some());
    }

    #[test]
    fn test_parse_review_without_author() {
        let json = r#"{"state":"APPROVED","body":""}"#;
        let review: PrReview = serde_json::from_str(json).unwrap();
        assert!(review.author.is_empty());
        assert!(review.state.is_approved());
    }

    #[test]
    fn test_review_state_variants() {
        for (text, blocking) in [
            ("\"APPROVED\"", false),
            ("\"CHANGES_REQUESTED\"", true),
            ("\"COMMENTED\"", false),
            ("\"DISMISSED\"", false),
        ] {
            let state: ReviewState = serde_json::from_str(text).unwrap();
            assert_eq!(state.is_blocking(), blocking);
        }
    }
}
