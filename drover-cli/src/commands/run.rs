//! Run command - execute one feature through the scheduler

use std::sync::Arc;

use clap::Args;
use drover_core::{
    AgentInvoker, Config, FeatureSpec, ProcessRegistry, TaskGraphScheduler,
    WorktreeLifecycleManager,
};
use drover_state::StateStore;
use drover_tracker::TrackerClient;

/// Run a feature: expand issues, solve, review, merge-gate
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Feature name (used for branches and the worktree)
    pub name: String,

    /// Feature description
    #[arg(short, long, default_value = "")]
    pub description: String,

    /// Base branch to build on
    #[arg(short, long, default_value = "main")]
    pub base: String,

    /// Issue numbers to work on (required unless --architecture)
    #[arg(short, long)]
    pub issue: Vec<u64>,

    /// Open one aggregate PR once all issues complete
    #[arg(long)]
    pub parent: bool,

    /// Discover issues with a planning phase instead of --issue
    #[arg(long)]
    pub architecture: bool,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let repo_root = std::env::current_dir()?;

        let store = StateStore::open_default()?;
        // this process must survive its own cancellation sweep
        let registry = ProcessRegistry::new([std::process::id()]);
        let invoker = Arc::new(AgentInvoker::new(config.agent.clone(), registry.clone()));

        let worktrees = Arc::new(
            WorktreeLifecycleManager::new(&repo_root, &config.worktree)?
                .with_runner(invoker.clone()),
        );
        let tracker = Arc::new(TrackerClient::new().with_cwd(&repo_root));

        let scheduler = TaskGraphScheduler::new(
            config.clone(),
            invoker,
            tracker,
            store.clone(),
            worktrees,
            registry,
        );

        let mut spec = FeatureSpec::new(&self.name, &self.base)
            .with_description(&self.description);
        if !self.issue.is_empty() {
            spec = spec.with_issues(self.issue.clone());
        }
        if self.parent {
            spec = spec.as_parent();
        }
        if self.architecture {
            spec = spec.with_architecture_mode();
        }

        let result = scheduler.execute(spec).await;

        // the last state of the run must reach disk before we exit
        store.shutdown().await;

        match result {
            Ok(()) => {
                println!("Feature '{}' completed.", self.name);
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("{}", e)),
        }
    }
}
