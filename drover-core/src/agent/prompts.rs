//! Agent prompt templates
//!
//! Embedded templates use `{{VARIABLE}}` placeholders rendered from a
//! [`PromptContext`]. Unset placeholders render as empty strings.

use std::collections::HashMap;

use crate::agent::AgentKind;

const ARCH_PROMPT: &str = include_str!("prompts/arch.md");
const SOLVER_PROMPT: &str = include_str!("prompts/solver.md");
const REVIEWER_PROMPT: &str = include_str!("prompts/reviewer.md");

/// Get the raw prompt template for an agent kind
pub fn get_template(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Arch => ARCH_PROMPT,
        AgentKind::Solver => SOLVER_PROMPT,
        AgentKind::Reviewer => REVIEWER_PROMPT,
    }
}

/// Context for rendering a prompt template
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    variables: HashMap<String, String>,
}

impl PromptContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable value (builder pattern)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Set the feature name
    pub fn with_feature(self, name: impl Into<String>) -> Self {
        self.with("FEATURE_NAME", name)
    }

    /// Set the issue being worked on
    pub fn with_issue(self, number: u64, title: impl Into<String>) -> Self {
        self.with("ISSUE_NUMBER", number.to_string())
            .with("ISSUE_TITLE", title)
    }

    /// Set the attempt counters
    pub fn with_attempt(self, attempt: u32, max_attempts: u32) -> Self {
        self.with("ATTEMPT", attempt.to_string())
            .with("MAX_ATTEMPTS", max_attempts.to_string())
    }

    /// Set synthesized feedback from earlier review rounds
    pub fn with_feedback(self, feedback: impl Into<String>) -> Self {
        self.with("FEEDBACK", feedback)
    }

    /// Render a template, substituting every known variable
    pub fn render(&self, template: &str) -> String {
        let mut rendered = template.to_string();
        for (key, value) in &self.variables {
            rendered = rendered.replace(&format!("{{{{{}}}}}", key), value);
        }
        // unset placeholders must not leak into agent input
        strip_placeholders(&rendered)
    }
}

/// Remove any `{{...}}` placeholders left unset, collapsing padding around them
fn strip_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        if let Some(end) = rest[start..].find("}}") {
            out.push_str(&rest[..start]);
            rest = &rest[start + end + 2..];
        } else {
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Render the template for an agent kind with the given context
pub fn render(kind: AgentKind, context: &PromptContext) -> String {
    context.render(get_template(kind))
}
