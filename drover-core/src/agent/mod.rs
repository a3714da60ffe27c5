//! Agent module: invoking external code agents and parsing what they say

mod invoke;
mod outcome;
mod prompts;
mod types;

pub use invoke::{
    AgentInvoker, AgentOutput, AgentRunner, NullSink, OutputSink, PROMPT_FILE_PREFIX,
};
pub use outcome::{
    extract_issue_numbers, extract_pr_number, has_rework_signal, parse_review_outcome,
    ParsedOutcome, ReviewDecision,
};
pub use prompts::{get_template, render, PromptContext};
pub use types::AgentKind;
