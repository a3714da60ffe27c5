//! Drover Tracker - issue and pull-request tracker client
//!
//! Wraps a `gh`-compatible tracker CLI. Every call shells out and parses the
//! JSON the tool prints; nothing here talks to a network API directly.

pub mod client;
pub mod dependencies;
pub mod error;
pub mod issues;
pub mod pr;

pub use client::{IssueTracker, TrackerClient};
pub use dependencies::{parse_dependencies, DependencyGraph};
pub use error::{Error, Result};
pub use issues::{Issue, IssueState};
pub use pr::{CreatePr, PrReview, PullRequest, ReviewState};
