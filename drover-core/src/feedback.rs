//! Feedback synthesis for retry attempts
//!
//! Converts accumulated review history into a short, de-duplicated list of
//! action items for the next solve attempt. Feedback is bounded: at most the
//! three most recent rejections feed the extraction, and at most five action
//! items survive, critical ones first.

use crate::agent::{has_rework_signal, ReviewDecision};
use crate::scheduler::TaskReview;

/// Most recent rejections considered once history spans multiple rounds
const MAX_RECENT_REJECTIONS: usize = 3;

/// Action items kept after dedup and priority sorting
const MAX_ACTION_ITEMS: usize = 5;

/// Bounds on a useful action item, in characters
const MIN_ITEM_LEN: usize = 10;
const MAX_ITEM_LEN: usize = 200;

/// Phrases that introduce an actionable demand
const ACTION_MARKERS: [&str; 12] = [
    "must fix",
    "must add",
    "must remove",
    "must implement",
    "need to",
    "needs to",
    "should fix",
    "should add",
    "should remove",
    "should implement",
    "missing",
    "lacks",
];

/// Prefixes that flag a problem statement
const PROBLEM_PREFIXES: [&str; 4] = ["error:", "issue:", "problem:", "requires"];

#[derive(Debug, Clone)]
struct ActionItem {
    text: String,
    reviewer: String,
    critical: bool,
}

/// Synthesize retry guidance from review history
///
/// Filters to rejections, bounds them by recency, extracts and de-duplicates
/// action items, and renders a structured message. A history with no usable
/// items yields a fixed fallback message rather than an empty string.
pub fn synthesize(history: &[TaskReview], attempt: u32) -> String {
    let mut rejections: Vec<&TaskReview> = history
        .iter()
        .filter(|r| r.result == ReviewDecision::Reject)
        .collect();

    // feedback must not grow without bound across retries
    if attempt > 1 && rejections.len() > MAX_RECENT_REJECTIONS {
        rejections.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        rejections.truncate(MAX_RECENT_REJECTIONS);
    }

    let mut items: Vec<ActionItem> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    for review in &rejections {
        let critical = has_rework_signal(&review.comments);
        let reviewer = if review.reviewer_id.is_empty() {
            "unknown".to_string()
        } else {
            review.reviewer_id.clone()
        };

        for candidate in extract_action_items(&review.comments) {
            let normalized = normalize(&candidate);
            if seen.contains(&normalized) {
                continue;
            }
            seen.push(normalized);
            items.push(ActionItem {
                text: candidate,
                reviewer: reviewer.clone(),
                critical,
            });
        }
    }

    // critical first, original order otherwise
    items.sort_by_key(|i| !i.critical);
    items.truncate(MAX_ACTION_ITEMS);

    render(&items, attempt)
}

/// Extract candidate action items from one review's text
fn extract_action_items(comments: &str) -> Vec<String> {
    let mut found = Vec::new();

    for fragment in comments
        .split(['\n', '.'])
        .map(str::trim)
        .filter(|f| !f.is_empty())
    {
        let cleaned = fragment.trim_start_matches(['-', '*', ' ']).trim();
        let lower = cleaned.to_lowercase();

        let actionable = ACTION_MARKERS.iter().any(|m| lower.contains(m))
            || PROBLEM_PREFIXES.iter().any(|p| lower.starts_with(p));

        if actionable && (MIN_ITEM_LEN..=MAX_ITEM_LEN).contains(&cleaned.len()) {
            found.push(cleaned.to_string());
        }
    }

    found
}

/// Case- and whitespace-insensitive form used for de-duplication
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn render(items: &[ActionItem], attempt: u32) -> String {
    if items.is_empty() {
        return format!(
            "## Review Feedback (attempt {})\n\n\
             Previous attempts were rejected, but reviews contained no \
             specific action items. Re-read the issue requirements and \
             address likely gaps in correctness and test coverage.",
            attempt
        );
    }

    let mut message = format!("## Review Feedback (attempt {})\n", attempt);

    let critical: Vec<&ActionItem> = items.iter().filter(|i| i.critical).collect();
    let normal: Vec<&ActionItem> = items.iter().filter(|i| !i.critical).collect();

    if !critical.is_empty() {
        message.push_str("\n### Critical\n");
        for item in &critical {
            message.push_str(&format!("- {} ({})\n", item.text, item.reviewer));
        }
    }

    if !normal.is_empty() {
        message.push_str("\n### Other\n");
        for item in &normal {
            message.push_str(&format!("- {} ({})\n", item.text, item.reviewer));
        }
    }

    message.push_str("\nAddress the critical items first, then the rest.\n");
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskReview;
    use chrono::Duration;

    fn reject(reviewer: &str, comments: &str) -> TaskReview {
        TaskReview::reject(reviewer, comments)
    }

    #[test]
    fn test_approvals_produce_no_items() {
        let history = vec![TaskReview::approve("backend", "LGTM, must fix nothing")];
        let feedback = synthesize(&history, 2);
        assert!(feedback.contains("no specific action items"));
    }

    #[test]
    fn test_extracts_and_attributes_items() {
        let history = vec![reject(
            "backend",
            "The handler panics on empty input.\nYou must fix the null check in parse().",
        )];

        let feedback = synthesize(&history, 2);
        assert!(feedback.contains("must fix the null check"));
        assert!(feedback.contains("(backend)"));
        assert!(feedback.contains("attempt 2"));
    }

    #[test]
    fn test_missing_reviewer_is_unknown() {
        let history = vec![reject("", "missing input validation on the form")];
        let feedback = synthesize(&history, 2);
        assert!(feedback.contains("(unknown)"));
    }

    #[test]
    fn test_identical_items_deduplicated() {
        let history = vec![
            reject("a", "You must fix the race in the writer"),
            reject("b", "you MUST  fix the race   in the writer"),
        ];

        let feedback = synthesize(&history, 2);
        let occurrences = feedback.matches("fix the race").count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn test_cap_at_five_critical_first() {
        let mut history = vec![reject(
            "normal-reviewer",
            "should fix the logging format in the dispatcher",
        )];
        // seven distinct critical items from a rework-required review
        let critical_comments: String = (0..7)
            .map(|i| format!("must fix critical defect number {} in module alpha\n", i))
            .collect();
        history.push(reject(
            "strict-reviewer",
            &format!("Rework required.\n{}", critical_comments),
        ));

        let feedback = synthesize(&history, 2);
        let item_count = feedback.lines().filter(|l| l.starts_with("- ")).count();
        assert_eq!(item_count, MAX_ACTION_ITEMS);
        // critical section filled the cap before the normal item
        assert!(!feedback.contains("logging format"));
        assert!(feedback.contains("### Critical"));
    }

    #[test]
    fn test_recency_bound_across_rounds() {
        let old = TaskReview {
            timestamp: chrono::Utc::now() - Duration::hours(3),
            ..reject("r1", "must fix the oldest defect in the parser")
        };
        let mut history = vec![old];
        for (i, offset) in [2i64, 1, 0].iter().enumerate() {
            history.push(TaskReview {
                timestamp: chrono::Utc::now() - Duration::hours(*offset),
                ..reject(
                    &format!("r{}", i + 2),
                    &format!("must fix recent defect {} in the parser", i),
                )
            });
        }

        let feedback = synthesize(&history, 3);
        // only the 3 most recent rejections contribute
        assert!(!feedback.contains("oldest defect"));
        assert!(feedback.contains("recent defect 2"));
    }

    #[test]
    fn test_length_bounds_filter_items() {
        let history = vec![reject(
            "r",
            &format!("must fix\nmissing {}", "x".repeat(300)),
        )];
        let feedback = synthesize(&history, 2);
        // both items fall outside 10..=200 chars
        assert!(feedback.contains("no specific action items"));
    }

    #[test]
    fn test_problem_prefix_extraction() {
        let history = vec![reject("r", "error: the migration drops the index")];
        let feedback = synthesize(&history, 2);
        assert!(feedback.contains("migration drops the index"));
    }
}
