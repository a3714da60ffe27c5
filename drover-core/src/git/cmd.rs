//! Shelled git operations
//!
//! Mutating git operations go through the git CLI. A merge that stops on
//! conflicts is surfaced as the distinguished [`Error::MergeConflict`] kind,
//! carrying the conflicting paths, so callers can attempt resolution instead
//! of treating it like any other command failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// One entry from `git worktree list --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    /// Worktree directory
    pub path: PathBuf,
    /// Branch checked out there, if not detached
    pub branch: Option<String>,
}

/// Run a git command, returning stdout on success
pub async fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(Error::Git(format!(
            "git {} failed: {}",
            args.join(" "),
            if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
        )));
    }

    debug!(?args, "git command succeeded");
    Ok(stdout)
}

/// Check out an existing branch
pub async fn checkout(cwd: &Path, branch: &str) -> Result<()> {
    git(cwd, &["checkout", branch]).await.map(|_| ())
}

/// Create and check out a new branch
pub async fn create_branch(cwd: &Path, branch: &str) -> Result<()> {
    git(cwd, &["checkout", "-b", branch]).await.map(|_| ())
}

/// Pull the current branch from its upstream
pub async fn pull(cwd: &Path) -> Result<()> {
    git(cwd, &["pull", "--ff-only"]).await.map(|_| ())
}

/// Detach HEAD, releasing the current branch for checkout elsewhere
pub async fn detach(cwd: &Path) -> Result<()> {
    git(cwd, &["checkout", "--detach"]).await.map(|_| ())
}

/// Push a branch, setting upstream on first push
pub async fn push(cwd: &Path, branch: &str) -> Result<()> {
    git(cwd, &["push", "--set-upstream", "origin", branch])
        .await
        .map(|_| ())
}

/// Merge a branch into the current one
///
/// A conflicted merge yields [`Error::MergeConflict`] with the conflicting
/// file list; the merge is left in progress for the resolver.
pub async fn merge(cwd: &Path, branch: &str) -> Result<()> {
    let output = Command::new("git")
        .args(["merge", branch, "--no-edit"])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        return Ok(());
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if stdout.contains("CONFLICT") || stderr.contains("CONFLICT") {
        let files = conflicted_files(cwd).await.unwrap_or_default();
        return Err(Error::MergeConflict { files });
    }

    Err(Error::Git(format!(
        "git merge {} failed: {}",
        branch,
        stderr.trim()
    )))
}

/// Abort an in-progress merge, restoring a clean tree
pub async fn merge_abort(cwd: &Path) -> Result<()> {
    git(cwd, &["merge", "--abort"]).await.map(|_| ())
}

/// Conclude an in-progress merge after conflict resolution
pub async fn merge_continue(cwd: &Path) -> Result<()> {
    git(cwd, &["commit", "--no-edit"]).await.map(|_| ())
}

/// List files currently in conflict
pub async fn conflicted_files(cwd: &Path) -> Result<Vec<String>> {
    let stdout = git(cwd, &["diff", "--name-only", "--diff-filter=U"]).await?;
    Ok(stdout
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

/// Stage everything, including deletions and untracked files
pub async fn stage_all(cwd: &Path) -> Result<()> {
    git(cwd, &["add", "-A"]).await.map(|_| ())
}

/// Stage one path
pub async fn stage(cwd: &Path, path: &str) -> Result<()> {
    git(cwd, &["add", "--", path]).await.map(|_| ())
}

/// Remove one path from the tree and index
pub async fn remove_path(cwd: &Path, path: &str) -> Result<()> {
    git(cwd, &["rm", "-f", "--", path]).await.map(|_| ())
}

/// Take one side of a conflicted path
pub async fn checkout_conflict_side(cwd: &Path, path: &str, theirs: bool) -> Result<()> {
    let side = if theirs { "--theirs" } else { "--ours" };
    git(cwd, &["checkout", side, "--", path]).await.map(|_| ())
}

/// Commit staged changes; "nothing to commit" is a non-error
///
/// Returns false when the tree was already clean.
pub async fn commit(cwd: &Path, message: &str) -> Result<bool> {
    let output = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if output.status.success() {
        return Ok(true);
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let combined = format!("{}{}", stdout, stderr);

    if combined.contains("nothing to commit") || combined.contains("nothing added to commit") {
        return Ok(false);
    }

    Err(Error::Git(format!("git commit failed: {}", combined.trim())))
}

/// Whether the working tree has uncommitted changes
pub async fn has_changes(cwd: &Path) -> Result<bool> {
    let stdout = git(cwd, &["status", "--porcelain"]).await?;
    Ok(!stdout.trim().is_empty())
}

/// Stash local changes, untracked files included
pub async fn stash_push(cwd: &Path) -> Result<()> {
    git(cwd, &["stash", "push", "--include-untracked"])
        .await
        .map(|_| ())
}

/// Restore the most recent stash
pub async fn stash_pop(cwd: &Path) -> Result<()> {
    git(cwd, &["stash", "pop"]).await.map(|_| ())
}

/// Add a worktree bound to an existing branch
pub async fn worktree_add(repo_root: &Path, path: &Path, branch: &str) -> Result<()> {
    let path_str = path
        .to_str()
        .ok_or_else(|| Error::Git("Invalid worktree path".to_string()))?;
    git(repo_root, &["worktree", "add", path_str, branch])
        .await
        .map(|_| ())
}

/// List worktrees of a repository
pub async fn worktree_list(repo_root: &Path) -> Result<Vec<WorktreeEntry>> {
    let stdout = git(repo_root, &["worktree", "list", "--porcelain"]).await?;

    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(reference) = line.strip_prefix("branch ") {
            if let Some(ref mut entry) = current {
                entry.branch = Some(
                    reference
                        .strip_prefix("refs/heads/")
                        .unwrap_or(reference)
                        .to_string(),
                );
            }
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }

    Ok(entries)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_support::{commit_file, init_repo, run};

    #[tokio::test]
    async fn test_commit_nothing_to_commit_is_ok_false() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        let committed = commit(dir.path(), "empty").await.unwrap();
        assert!(!committed);
    }

    #[tokio::test]
    async fn test_stage_and_commit() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        std::fs::write(dir.path().join("new.txt"), "hello").unwrap();
        assert!(has_changes(dir.path()).await.unwrap());

        stage_all(dir.path()).await.unwrap();
        let committed = commit(dir.path(), "add new.txt").await.unwrap();
        assert!(committed);
        assert!(!has_changes(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_conflict_is_distinguished() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        commit_file(dir.path(), "shared.txt", "base\n", "base");

        run(dir.path(), &["checkout", "-b", "side"]);
        commit_file(dir.path(), "shared.txt", "side\n", "side change");

        run(dir.path(), &["checkout", "main"]);
        commit_file(dir.path(), "shared.txt", "main\n", "main change");

        let result = merge(dir.path(), "side").await;
        match result {
            Err(Error::MergeConflict { files }) => {
                assert_eq!(files, vec!["shared.txt".to_string()]);
            }
            other => panic!("expected merge conflict, got {:?}", other),
        }

        merge_abort(dir.path()).await.unwrap();
        assert!(!has_changes(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_clean_merge_succeeds() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        run(dir.path(), &["checkout", "-b", "side"]);
        commit_file(dir.path(), "side.txt", "side\n", "side file");

        run(dir.path(), &["checkout", "main"]);
        merge(dir.path(), "side").await.unwrap();
        assert!(dir.path().join("side.txt").exists());
    }

    #[tokio::test]
    async fn test_worktree_add_and_list() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        run(dir.path(), &["branch", "feature/x"]);

        let wt_dir = TempDir::new().unwrap();
        let wt_path = wt_dir.path().join("x");
        worktree_add(dir.path(), &wt_path, "feature/x").await.unwrap();

        let entries = worktree_list(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert!(entries
            .iter()
            .any(|e| e.branch.as_deref() == Some("feature/x")));
    }

    #[tokio::test]
    async fn test_stash_roundtrip() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());

        std::fs::write(dir.path().join("wip.txt"), "wip").unwrap();
        stash_push(dir.path()).await.unwrap();
        assert!(!dir.path().join("wip.txt").exists());

        stash_pop(dir.path()).await.unwrap();
        assert!(dir.path().join("wip.txt").exists());
    }
}
