//! Issue wire types

use serde::{Deserialize, Serialize};

/// Issue state as reported by the tracker CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IssueState {
    Open,
    Closed,
}

/// An issue as returned by `<tracker> issue view N --json ...`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number
    pub number: u64,
    /// Issue title
    pub title: String,
    /// Issue body text; dependency declarations live in here as free text
    #[serde(default)]
    pub body: String,
    /// Current state
    pub state: IssueState,
}

impl Issue {
    /// Issue numbers this issue depends on, parsed from the body text
    pub fn dependencies(&self) -> Vec<u64> {
        crate::dependencies::parse_dependencies(&self.body)
    }
}
