//! Merge conflict classification and automatic resolution
//!
//! Each conflicted file maps to exactly one strategy by path pattern, first
//! match wins. A merge is only concluded when every file resolved; one
//! unresolved file aborts the whole merge so the tree is never left
//! half-merged.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::{AgentKind, AgentRunner, NullSink, PROMPT_FILE_PREFIX};
use crate::git::cmd;
use crate::Result;

/// How to resolve one conflicted file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Transient artifact; remove it
    Delete,
    /// Take the incoming side; the newer run supersedes
    Theirs,
    /// Keep both sides; history accumulates
    MergeBoth,
    /// Content-aware resolution by an agent
    Agent,
    /// Leave for a human
    Manual,
}

/// Suffixes treated as source or config content, where automatic textual
/// resolution is unsafe
const SOURCE_SUFFIXES: [&str; 20] = [
    ".rs", ".ts", ".tsx", ".js", ".jsx", ".py", ".go", ".java", ".c", ".cpp", ".h", ".rb",
    ".toml", ".yaml", ".yml", ".json", ".cfg", ".ini", ".sh", ".sql",
];

/// Classify a conflicted path into its resolution strategy
///
/// The same path always maps to the same strategy.
pub fn classify(path: &str, context_dir: &str) -> ResolutionStrategy {
    let file_name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    let is_root_level = !path.contains('/');
    let in_context_dir = path.starts_with(&format!("{}/", context_dir));

    if is_root_level && file_name.starts_with(PROMPT_FILE_PREFIX) {
        return ResolutionStrategy::Delete;
    }

    if in_context_dir
        && (file_name.starts_with("solver-") || file_name.starts_with("reviewer-"))
    {
        return ResolutionStrategy::Theirs;
    }

    if in_context_dir {
        let upper = file_name.to_uppercase();
        if upper.contains("NOTES") || upper.contains("CHANGELOG") {
            return ResolutionStrategy::MergeBoth;
        }
    }

    let lower = file_name.to_lowercase();
    if SOURCE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return ResolutionStrategy::Agent;
    }

    ResolutionStrategy::Manual
}

/// Strip conflict markers, keeping the content of both sides
fn merge_both_sides(content: &str) -> String {
    let mut merged = String::with_capacity(content.len());
    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with("<<<<<<<")
            || trimmed.starts_with(">>>>>>>")
            || trimmed == "======="
        {
            continue;
        }
        merged.push_str(line);
        merged.push('\n');
    }
    merged
}

/// Resolves merge conflicts file by file
pub struct MergeConflictResolver {
    context_dir: String,
    runner: Option<Arc<dyn AgentRunner>>,
}

impl std::fmt::Debug for MergeConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeConflictResolver")
            .field("context_dir", &self.context_dir)
            .field("has_runner", &self.runner.is_some())
            .finish()
    }
}

impl MergeConflictResolver {
    /// Create a resolver without agent-backed resolution
    pub fn new(context_dir: impl Into<String>) -> Self {
        Self {
            context_dir: context_dir.into(),
            runner: None,
        }
    }

    /// Enable agent-backed resolution for source files
    pub fn with_runner(mut self, runner: Arc<dyn AgentRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Attempt to resolve all conflicts of an in-progress merge
    ///
    /// Returns true when every conflicted file was resolved and the merge was
    /// concluded. Otherwise the merge is aborted, the tree restored, and
    /// false returned.
    pub async fn resolve_merge_conflicts(&self, cwd: &Path, branch: &str) -> Result<bool> {
        let files = cmd::conflicted_files(cwd).await?;
        if files.is_empty() {
            return Ok(true);
        }

        info!(count = files.len(), branch, "attempting automatic conflict resolution");

        let mut unresolved = Vec::new();
        for file in &files {
            let strategy = classify(file, &self.context_dir);
            let resolved = match strategy {
                ResolutionStrategy::Delete => cmd::remove_path(cwd, file).await.is_ok(),
                ResolutionStrategy::Theirs => self.take_theirs(cwd, file).await,
                ResolutionStrategy::MergeBoth => self.merge_both(cwd, file).await,
                ResolutionStrategy::Agent => self.resolve_with_agent(cwd, file).await,
                ResolutionStrategy::Manual => false,
            };

            if resolved {
                info!(file, ?strategy, "conflict resolved");
            } else {
                unresolved.push(file.clone());
            }
        }

        if unresolved.is_empty() {
            cmd::merge_continue(cwd).await?;
            return Ok(true);
        }

        warn!(?unresolved, "unresolved conflicts, aborting merge");
        if let Err(e) = cmd::merge_abort(cwd).await {
            warn!("merge abort failed: {}", e);
        }
        Ok(false)
    }

    async fn take_theirs(&self, cwd: &Path, file: &str) -> bool {
        cmd::checkout_conflict_side(cwd, file, true).await.is_ok()
            && cmd::stage(cwd, file).await.is_ok()
    }

    async fn merge_both(&self, cwd: &Path, file: &str) -> bool {
        let path = cwd.join(file);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return false;
        };
        if std::fs::write(&path, merge_both_sides(&content)).is_err() {
            return false;
        }
        cmd::stage(cwd, file).await.is_ok()
    }

    async fn resolve_with_agent(&self, cwd: &Path, file: &str) -> bool {
        let Some(ref runner) = self.runner else {
            return false;
        };

        let prompt = format!(
            "The file `{}` has merge conflict markers from an interrupted merge.\n\
             Edit the file so it contains the correct combined result of both \
             sides, with every conflict marker removed. Do not change any other \
             file.",
            file
        );

        let mut sink = NullSink;
        if let Err(e) = runner.invoke(AgentKind::Solver, &prompt, cwd, &mut sink).await {
            warn!(file, "agent conflict resolution failed: {}", e);
            return false;
        }

        // trust but verify: markers must actually be gone
        match std::fs::read_to_string(cwd.join(file)) {
            Ok(content) if !content.contains("<<<<<<<") && !content.contains(">>>>>>>") => {
                cmd::stage(cwd, file).await.is_ok()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::cmd::test_support::{commit_file, init_repo, run};
    use tempfile::TempDir;

    #[test]
    fn test_classification_table() {
        let ctx = ".drover";
        assert_eq!(
            classify(".drover-prompt-solver-3.md", ctx),
            ResolutionStrategy::Delete
        );
        assert_eq!(
            classify(".drover/solver-context.md", ctx),
            ResolutionStrategy::Theirs
        );
        assert_eq!(
            classify(".drover/reviewer-frontend.md", ctx),
            ResolutionStrategy::Theirs
        );
        assert_eq!(
            classify(".drover/ARCHITECTURE_NOTES.md", ctx),
            ResolutionStrategy::MergeBoth
        );
        assert_eq!(
            classify(".drover/CHANGELOG.md", ctx),
            ResolutionStrategy::MergeBoth
        );
        assert_eq!(classify("src/app.ts", ctx), ResolutionStrategy::Agent);
        assert_eq!(classify("Cargo.toml", ctx), ResolutionStrategy::Agent);
        assert_eq!(classify("docs/guide.md", ctx), ResolutionStrategy::Manual);
        assert_eq!(classify("LICENSE", ctx), ResolutionStrategy::Manual);
    }

    #[test]
    fn test_classification_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(classify("src/app.ts", ".drover"), ResolutionStrategy::Agent);
        }
        // source files are never auto-deleted
        assert_ne!(classify("src/app.ts", ".drover"), ResolutionStrategy::Delete);
    }

    #[test]
    fn test_prompt_files_only_at_root() {
        // nested files with the prompt prefix are not root-level artifacts
        assert_ne!(
            classify("nested/.drover-prompt-solver-1.md", ".drover"),
            ResolutionStrategy::Delete
        );
    }

    #[test]
    fn test_merge_both_sides_strips_markers() {
        let conflicted = "\
shared\n<<<<<<< HEAD\nours line\n=======\ntheirs line\n>>>>>>> side\ntail\n";
        let merged = merge_both_sides(conflicted);
        assert!(merged.contains("ours line"));
        assert!(merged.contains("theirs line"));
        assert!(!merged.contains("<<<<<<<"));
        assert!(!merged.contains("======="));
        assert!(!merged.contains(">>>>>>>"));
    }

    /// Build a repo where `side` and `main` both edited the same files
    fn conflicted_repo(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        if files.iter().any(|f| f.contains('/')) {
            std::fs::create_dir_all(dir.path().join(".drover")).unwrap();
        }
        for file in files {
            commit_file(dir.path(), file, "base\n", "base");
        }

        run(dir.path(), &["checkout", "-b", "side"]);
        for file in files {
            commit_file(dir.path(), file, "theirs\n", "side change");
        }

        run(dir.path(), &["checkout", "main"]);
        for file in files {
            commit_file(dir.path(), file, "ours\n", "main change");
        }
        dir
    }

    #[tokio::test]
    async fn test_resolver_merges_notes_and_concludes() {
        let dir = conflicted_repo(&[".drover/ARCHITECTURE_NOTES.md"]);
        let merge_result = cmd::merge(dir.path(), "side").await;
        assert!(merge_result.is_err());

        let resolver = MergeConflictResolver::new(".drover");
        let resolved = resolver
            .resolve_merge_conflicts(dir.path(), "side")
            .await
            .unwrap();
        assert!(resolved);

        let content =
            std::fs::read_to_string(dir.path().join(".drover/ARCHITECTURE_NOTES.md")).unwrap();
        assert!(content.contains("ours"));
        assert!(content.contains("theirs"));
        assert!(!cmd::has_changes(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolver_takes_theirs_for_role_files() {
        let dir = conflicted_repo(&[".drover/solver-context.md"]);
        assert!(cmd::merge(dir.path(), "side").await.is_err());

        let resolver = MergeConflictResolver::new(".drover");
        assert!(resolver
            .resolve_merge_conflicts(dir.path(), "side")
            .await
            .unwrap());

        let content =
            std::fs::read_to_string(dir.path().join(".drover/solver-context.md")).unwrap();
        assert_eq!(content, "theirs\n");
    }

    #[tokio::test]
    async fn test_unresolved_source_conflict_aborts_merge() {
        let dir = conflicted_repo(&["src.rs"]);
        assert!(cmd::merge(dir.path(), "side").await.is_err());

        // no runner configured: source files cannot be auto-resolved
        let resolver = MergeConflictResolver::new(".drover");
        let resolved = resolver
            .resolve_merge_conflicts(dir.path(), "side")
            .await
            .unwrap();
        assert!(!resolved);

        // merge aborted, tree restored to ours
        assert!(!cmd::has_changes(dir.path()).await.unwrap());
        let content = std::fs::read_to_string(dir.path().join("src.rs")).unwrap();
        assert_eq!(content, "ours\n");
    }
}
