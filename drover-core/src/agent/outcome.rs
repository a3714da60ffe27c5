//! Best-effort parsing of agent output
//!
//! Reviewer and solver output is natural language; parsing it can fail. The
//! result is therefore a tagged outcome so callers decide explicitly what an
//! ambiguous parse means (the scheduler treats it as a rejection).

/// A reviewer's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Outcome of parsing reviewer output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedOutcome {
    /// An explicit or confidently inferred decision
    Parsed(ReviewDecision),
    /// No decision could be inferred
    Ambiguous,
}

impl ParsedOutcome {
    /// Collapse to a decision, treating ambiguity as rejection (fail-closed)
    pub fn decision_or_reject(self) -> ReviewDecision {
        match self {
            ParsedOutcome::Parsed(decision) => decision,
            ParsedOutcome::Ambiguous => ReviewDecision::Reject,
        }
    }
}

const APPROVE_MARKERS: [&str; 2] = ["verdict: approve", "verdict:approve"];
const REJECT_MARKERS: [&str; 2] = ["verdict: reject", "verdict:reject"];

const APPROVE_HINTS: [&str; 3] = ["lgtm", "looks good to me", "approved"];
const REJECT_HINTS: [&str; 4] = [
    "request changes",
    "changes requested",
    "rework required",
    "must fix",
];

/// Parse a reviewer's output into a tagged outcome
///
/// Explicit `VERDICT:` markers win; the last one in the output counts.
/// Without a marker, keyword hints are consulted, and conflicting or absent
/// hints leave the outcome ambiguous.
pub fn parse_review_outcome(text: &str) -> ParsedOutcome {
    let lower = text.to_lowercase();

    let last_approve = APPROVE_MARKERS.iter().filter_map(|m| lower.rfind(m)).max();
    let last_reject = REJECT_MARKERS.iter().filter_map(|m| lower.rfind(m)).max();

    match (last_approve, last_reject) {
        (Some(a), Some(r)) => {
            if a > r {
                return ParsedOutcome::Parsed(ReviewDecision::Approve);
            }
            return ParsedOutcome::Parsed(ReviewDecision::Reject);
        }
        (Some(_), None) => return ParsedOutcome::Parsed(ReviewDecision::Approve),
        (None, Some(_)) => return ParsedOutcome::Parsed(ReviewDecision::Reject),
        (None, None) => {}
    }

    let approves = APPROVE_HINTS.iter().any(|h| lower.contains(h));
    let rejects = REJECT_HINTS.iter().any(|h| lower.contains(h));

    match (approves, rejects) {
        (true, false) => ParsedOutcome::Parsed(ReviewDecision::Approve),
        (false, true) => ParsedOutcome::Parsed(ReviewDecision::Reject),
        _ => ParsedOutcome::Ambiguous,
    }
}

/// Whether review text carries an explicit rework-required signal
pub fn has_rework_signal(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["rework required", "request changes", "changes requested", "needs rework"]
        .iter()
        .any(|s| lower.contains(s))
}

/// Extract the pull request number a solver reports having opened
///
/// Recognizes `PR #N`, `pull request #N` and `/pull/N` URL forms; the last
/// mention wins, since agents often restate the final result at the end.
pub fn extract_pr_number(text: &str) -> Option<u64> {
    let lower = text.to_lowercase();
    let mut found = None;

    for marker in ["pull request #", "pr #", "/pull/"] {
        let mut search_from = 0;
        while let Some(pos) = lower[search_from..].find(marker) {
            let digits_at = search_from + pos + marker.len();
            if let Some(number) = leading_number(&lower[digits_at..]) {
                found = Some(number);
            }
            search_from = digits_at;
        }
    }

    found
}

/// Extract all `#N` issue references, in order of first appearance
pub fn extract_issue_numbers(text: &str) -> Vec<u64> {
    let mut numbers = Vec::new();
    let mut search_from = 0;

    while let Some(pos) = text[search_from..].find('#') {
        let digits_at = search_from + pos + 1;
        if let Some(number) = leading_number(&text[digits_at..]) {
            if !numbers.contains(&number) {
                numbers.push(number);
            }
        }
        search_from = digits_at;
    }

    numbers
}

fn leading_number(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
