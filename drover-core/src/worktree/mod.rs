//! Worktree lifecycle management
//!
//! One worktree is shared by all tasks of a feature; per-issue work happens
//! on per-issue branches inside it. Setup is a strictly ordered sequence of
//! idempotent steps: sync the base branch, ensure the feature branch, merge
//! base into it, ensure the worktree directory, verify its checkout.

mod conflict;

pub use conflict::{classify, MergeConflictResolver, ResolutionStrategy};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::AgentRunner;
use crate::config::WorktreeConfig;
use crate::git::{cmd, GitRepo};
use crate::{Error, Result};

/// A prepared worktree for one feature
#[derive(Debug, Clone)]
pub struct WorktreeSetup {
    /// Worktree directory
    pub path: PathBuf,
    /// Branch the worktree tracks
    pub branch: String,
}

/// Manages feature worktrees of one repository clone
pub struct WorktreeLifecycleManager {
    repo_root: PathBuf,
    worktree_root: PathBuf,
    context_dir: String,
    resolver: MergeConflictResolver,
    /// Serializes git mutations; concurrent tasks share one worktree and git
    /// tolerates only one index/HEAD mutation at a time
    ops_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for WorktreeLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorktreeLifecycleManager")
            .field("repo_root", &self.repo_root)
            .field("worktree_root", &self.worktree_root)
            .finish_non_exhaustive()
    }
}

/// The feature branch for a feature name
pub fn feature_branch(name: &str) -> String {
    format!("feature/{}", name)
}

/// The per-issue branch inside a feature worktree
pub fn issue_branch(feature: &str, issue: u64) -> String {
    format!("feature/{}-issue-{}", feature, issue)
}

/// Sanitize a name for use as a directory component
fn sanitize(name: &str) -> String {
    name.replace(['/', '\\', ':'], "-")
}

impl WorktreeLifecycleManager {
    /// Create a manager for the repository at `repo_root`
    pub fn new(repo_root: impl Into<PathBuf>, config: &WorktreeConfig) -> Result<Self> {
        Ok(Self {
            repo_root: repo_root.into(),
            worktree_root: config.resolved_root()?,
            context_dir: config.context_dir.clone(),
            resolver: MergeConflictResolver::new(config.context_dir.clone()),
            ops_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Enable agent-backed conflict resolution
    pub fn with_runner(mut self, runner: Arc<dyn AgentRunner>) -> Self {
        self.resolver = MergeConflictResolver::new(self.context_dir.clone()).with_runner(runner);
        self
    }

    /// Directory a feature's worktree lives in
    pub fn worktree_path(&self, name: &str) -> PathBuf {
        self.worktree_root.join(sanitize(name))
    }

    /// Prepare the worktree for a feature run
    pub async fn setup_for_feature(
        &self,
        name: &str,
        base_branch: &str,
        is_parent_feature: bool,
    ) -> Result<WorktreeSetup> {
        self.setup(name, base_branch, is_parent_feature).await
    }

    /// Prepare the worktree for an architecture-mode run
    ///
    /// Architecture mode always works on a feature branch, since the planning
    /// agent commits context files before any issue exists.
    pub async fn setup_for_architecture(
        &self,
        name: &str,
        base_branch: &str,
    ) -> Result<WorktreeSetup> {
        self.setup(name, base_branch, true).await
    }

    async fn setup(
        &self,
        name: &str,
        base_branch: &str,
        use_feature_branch: bool,
    ) -> Result<WorktreeSetup> {
        let _guard = self.ops_lock.lock().await;
        self.sync_base_branch(base_branch).await?;

        let target_branch = if use_feature_branch {
            let branch = feature_branch(name);
            self.ensure_feature_branch(&branch, base_branch).await?;
            self.sync_feature_branch(name, &branch, base_branch).await?;
            branch
        } else {
            base_branch.to_string()
        };

        let path = self.ensure_worktree(name, &target_branch).await?;
        self.verify_worktree_branch(&path, &target_branch).await?;

        info!(feature = name, branch = %target_branch, path = %path.display(), "worktree ready");
        Ok(WorktreeSetup {
            path,
            branch: target_branch,
        })
    }

    /// Step 1: check out and update the base branch
    ///
    /// When the base branch is already checked out in one of our worktrees,
    /// git refuses a second checkout; the sync happens there instead.
    async fn sync_base_branch(&self, base_branch: &str) -> Result<()> {
        let sync_dir = match cmd::checkout(&self.repo_root, base_branch).await {
            Ok(()) => self.repo_root.clone(),
            Err(checkout_err) => {
                let worktrees = cmd::worktree_list(&self.repo_root).await?;
                match worktrees
                    .into_iter()
                    .find(|w| w.branch.as_deref() == Some(base_branch))
                {
                    Some(entry) => entry.path,
                    None => return Err(checkout_err),
                }
            }
        };

        // local state stays authoritative when there is no reachable upstream
        if let Err(e) = cmd::pull(&sync_dir).await {
            warn!(branch = base_branch, "pull failed, continuing with local state: {}", e);
        }
        Ok(())
    }

    /// Step 2: make sure the feature branch exists and is checked out somewhere
    async fn ensure_feature_branch(&self, branch: &str, base_branch: &str) -> Result<()> {
        let worktrees = cmd::worktree_list(&self.repo_root).await?;
        if worktrees.iter().any(|w| w.branch.as_deref() == Some(branch)) {
            // already checked out in some worktree; leave it there
            return Ok(());
        }

        let repo = GitRepo::open(&self.repo_root)?;
        if repo.branch_exists(branch) {
            cmd::checkout(&self.repo_root, branch).await?;
            return Ok(());
        }

        // branch from the freshly synced base
        cmd::checkout(&self.repo_root, base_branch).await?;
        cmd::create_branch(&self.repo_root, branch).await?;
        if let Err(e) = cmd::push(&self.repo_root, branch).await {
            warn!(branch, "could not push new feature branch: {}", e);
        }
        Ok(())
    }

    /// Step 3: merge base into the feature branch, resolving conflicts
    async fn sync_feature_branch(
        &self,
        name: &str,
        branch: &str,
        base_branch: &str,
    ) -> Result<()> {
        // merge where the feature branch is checked out: the worktree when it
        // already exists, the main clone otherwise
        let worktree = self.worktree_path(name);
        let cwd = if worktree.exists() {
            // a worktree left on an issue branch would receive the merge on
            // the wrong branch; put it back on the feature branch first
            self.verify_worktree_branch(&worktree, branch).await?;
            worktree.as_path()
        } else {
            self.repo_root.as_path()
        };

        match cmd::merge(cwd, base_branch).await {
            Ok(()) => Ok(()),
            Err(Error::MergeConflict { files }) => {
                let resolved = self
                    .resolver
                    .resolve_merge_conflicts(cwd, base_branch)
                    .await?;
                if resolved {
                    Ok(())
                } else {
                    Err(Error::MergeConflict { files })
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Step 4: create the worktree directory if and only if it is absent
    async fn ensure_worktree(&self, name: &str, branch: &str) -> Result<PathBuf> {
        let path = self.worktree_path(name);
        if path.exists() {
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // release the branch if the main clone holds it
        let repo = GitRepo::open(&self.repo_root)?;
        if repo.current_branch()?.as_deref() == Some(branch) {
            cmd::detach(&self.repo_root).await?;
        }

        cmd::worktree_add(&self.repo_root, &path, branch).await?;
        Ok(path)
    }

    /// Step 5: switch the worktree to the target branch if it drifted
    async fn verify_worktree_branch(&self, path: &Path, branch: &str) -> Result<()> {
        let repo = GitRepo::open(path)?;
        if repo.current_branch()?.as_deref() == Some(branch) {
            return Ok(());
        }

        let stashed = if cmd::has_changes(path).await? {
            cmd::stash_push(path).await?;
            true
        } else {
            false
        };

        cmd::checkout(path, branch).await?;

        if stashed {
            // a failed restore leaves the changes safely stashed
            if let Err(e) = cmd::stash_pop(path).await {
                warn!(path = %path.display(), "stash restore failed, changes remain stashed: {}", e);
            }
        }

        Ok(())
    }

    /// Create or reuse the branch for one issue inside the shared worktree
    pub async fn setup_issue_branch(
        &self,
        worktree: &Path,
        feature: &str,
        issue: u64,
    ) -> Result<String> {
        let _guard = self.ops_lock.lock().await;
        let branch = issue_branch(feature, issue);
        let repo = GitRepo::open(worktree)?;

        if repo.branch_exists(&branch) {
            cmd::checkout(worktree, &branch).await?;
        } else {
            cmd::create_branch(worktree, &branch).await?;
        }

        Ok(branch)
    }

    /// Stage and commit everything the solver changed, then push the branch
    ///
    /// Returns false when there was nothing to commit; an agent that only
    /// analyzed code is not an error.
    pub async fn commit_issue_changes(
        &self,
        worktree: &Path,
        feature: &str,
        issue: u64,
    ) -> Result<bool> {
        let _guard = self.ops_lock.lock().await;

        // another task may have switched the shared worktree since this
        // task's branch setup; re-assert the issue branch before staging
        let branch = issue_branch(feature, issue);
        let repo = GitRepo::open(worktree)?;
        if repo.current_branch()?.as_deref() != Some(branch.as_str()) {
            if let Err(e) = cmd::checkout(worktree, &branch).await {
                warn!(branch = %branch, "could not re-assert issue branch before commit: {}", e);
            }
        }

        cmd::stage_all(worktree).await?;
        // the context directory may hold new planning notes; make sure it
        // rides along even if ignored rules change
        let context = worktree.join(&self.context_dir);
        if context.exists() {
            let _ = cmd::stage(worktree, &self.context_dir).await;
        }

        let message = format!("feat({}): implement issue #{}", feature, issue);
        let committed = cmd::commit(worktree, &message).await?;

        if committed {
            cmd::push(worktree, &branch).await?;
        }

        Ok(committed)
    }
}
