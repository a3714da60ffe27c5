//! Dependency-gated, concurrency-bounded task scheduling
//!
//! The scheduler expands a feature spec into per-issue tasks, then drives a
//! polling dispatch loop: compute ready tasks, dispatch each as an
//! independent unit of work bounded by `max_concurrent_tasks`, and collect
//! completions. Dispatch latency of a poll tick is irrelevant next to
//! multi-minute agent runtimes.
//!
//! Per task: solve, commit, read back the pull request, then one review
//! invocation per configured reviewer profile in fixed order. Acceptance
//! requires every review to approve; any rejection requeues the task until
//! its attempts are exhausted, which fails the whole run.

mod task;

pub use task::{
    validate_acyclic, FeatureSpec, FeatureTask, TaskReview, TaskStatus, DEFAULT_MAX_ATTEMPTS,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use drover_state::{AgentStatus, FeatureRecord, IssueRecord, StateStore, WorktreeRecord};
use drover_tracker::{CreatePr, IssueTracker};

use crate::agent::{
    self, AgentKind, AgentOutput, AgentRunner, OutputSink, PromptContext, ReviewDecision,
};
use crate::config::Config;
use crate::feedback;
use crate::procs::ProcessRegistry;
use crate::worktree::{WorktreeLifecycleManager, WorktreeSetup};
use crate::{Error, Result};

/// Appends agent output lines to the store's bounded per-agent log
struct StoreSink {
    store: Arc<StateStore>,
    agent_id: String,
}

impl OutputSink for StoreSink {
    fn on_line(&mut self, line: &str) {
        self.store.append_agent_log(&self.agent_id, line);
    }
}

type TaskMap = Arc<Mutex<HashMap<u64, FeatureTask>>>;

/// Drives a feature run to completion
#[derive(Clone)]
pub struct TaskGraphScheduler {
    config: Config,
    runner: Arc<dyn AgentRunner>,
    tracker: Arc<dyn IssueTracker>,
    store: Arc<StateStore>,
    worktrees: Arc<WorktreeLifecycleManager>,
    registry: ProcessRegistry,
}

impl TaskGraphScheduler {
    /// Create a scheduler from its collaborators
    pub fn new(
        config: Config,
        runner: Arc<dyn AgentRunner>,
        tracker: Arc<dyn IssueTracker>,
        store: Arc<StateStore>,
        worktrees: Arc<WorktreeLifecycleManager>,
        registry: ProcessRegistry,
    ) -> Self {
        Self {
            config,
            runner,
            tracker,
            store,
            worktrees,
            registry,
        }
    }

    /// Execute a feature run to completion or first fatal error
    pub async fn execute(&self, spec: FeatureSpec) -> Result<()> {
        info!(feature = %spec.name, base = %spec.base_branch, "starting feature run");
        self.store.put_feature(FeatureRecord::new(
            &spec.name,
            &spec.description,
            &spec.base_branch,
        ));

        let result = self.run(&spec).await;

        match &result {
            Ok(()) => {
                info!(feature = %spec.name, "feature run completed");
                self.store.update_feature(&spec.name, |f| f.mark_completed());
            }
            Err(e) => {
                error!(feature = %spec.name, "feature run failed: {}", e);
                self.store.update_feature(&spec.name, |f| f.mark_failed());
                self.registry
                    .terminate_all(self.config.scheduler.kill_grace)
                    .await;
            }
        }

        result
    }

    async fn run(&self, spec: &FeatureSpec) -> Result<()> {
        let setup = if spec.architecture_mode {
            self.worktrees
                .setup_for_architecture(&spec.name, &spec.base_branch)
                .await?
        } else {
            self.worktrees
                .setup_for_feature(&spec.name, &spec.base_branch, spec.is_parent_feature)
                .await?
        };

        self.store.put_worktree(WorktreeRecord::new(
            &spec.name,
            setup.path.display().to_string(),
            &setup.branch,
            &spec.name,
        ));

        let tasks = self.expand_tasks(spec, &setup).await?;
        task::validate_acyclic(&tasks)?;

        for t in tasks.values() {
            self.store
                .put_issue(IssueRecord::new(t.issue_number, &spec.name, &t.title));
        }

        let tasks: TaskMap = Arc::new(Mutex::new(tasks));
        self.dispatch_loop(spec, &setup, &tasks).await?;

        if spec.is_parent_feature && !spec.architecture_mode {
            self.open_parent_pr(spec, &setup, &tasks).await?;
        }

        Ok(())
    }

    /// The polling dispatch loop
    async fn dispatch_loop(
        &self,
        spec: &FeatureSpec,
        setup: &WorktreeSetup,
        tasks: &TaskMap,
    ) -> Result<()> {
        let active: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u64, Result<()>)>();

        loop {
            let (all_completed, ready, active_count) = {
                let tasks_guard = tasks.lock().await;
                let active_guard = active.lock().await;
                let all = tasks_guard
                    .values()
                    .all(|t| t.status == TaskStatus::Completed);
                let mut ready: Vec<u64> = tasks_guard
                    .values()
                    .filter(|t| t.is_ready(&tasks_guard))
                    .map(|t| t.issue_number)
                    .filter(|n| !active_guard.contains(n))
                    .collect();
                ready.sort_unstable();
                (all, ready, active_guard.len())
            };

            if all_completed {
                return Ok(());
            }

            // a task blocked on a dependency outside the run can never become
            // ready; with nothing active either, the run would stall forever
            if ready.is_empty() && active_count == 0 {
                let blocked = self.describe_blocked(tasks).await;
                return Err(Error::Other(format!(
                    "no runnable tasks remain; unsatisfiable dependencies: {}",
                    blocked
                )));
            }

            {
                let mut active_guard = active.lock().await;
                for issue in ready {
                    if active_guard.len() >= self.config.scheduler.max_concurrent_tasks {
                        break;
                    }
                    active_guard.insert(issue);

                    let this = self.clone();
                    let spec = spec.clone();
                    let setup = setup.clone();
                    let tasks = Arc::clone(tasks);
                    let done_tx = done_tx.clone();
                    tokio::spawn(async move {
                        let result = this.run_task(issue, &spec, &setup, &tasks).await;
                        let _ = done_tx.send((issue, result));
                    });
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupt received, terminating agents");
                    self.registry
                        .terminate_all(self.config.scheduler.kill_grace)
                        .await;
                    return Err(Error::Interrupted);
                }
                completion = done_rx.recv() => {
                    if let Some((issue, result)) = completion {
                        active.lock().await.remove(&issue);
                        // a task error stops dispatching new work immediately
                        result?;
                    }
                }
                _ = tokio::time::sleep(self.config.scheduler.poll_interval) => {}
            }
        }
    }

    async fn describe_blocked(&self, tasks: &TaskMap) -> String {
        let guard = tasks.lock().await;
        let mut parts: Vec<String> = guard
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| {
                let missing: Vec<String> = t
                    .dependencies
                    .iter()
                    .filter(|d| {
                        guard
                            .get(d)
                            .map(|dep| dep.status != TaskStatus::Completed)
                            .unwrap_or(true)
                    })
                    .map(|d| format!("#{}", d))
                    .collect();
                format!("#{} waits on {}", t.issue_number, missing.join(", "))
            })
            .collect();
        parts.sort();
        parts.join("; ")
    }

    /// Expand the spec into its task set
    async fn expand_tasks(
        &self,
        spec: &FeatureSpec,
        setup: &WorktreeSetup,
    ) -> Result<HashMap<u64, FeatureTask>> {
        let issue_numbers: Vec<u64> = if spec.architecture_mode {
            self.run_architecture_phase(spec, setup).await?
        } else {
            match &spec.issues {
                Some(issues) if !issues.is_empty() => issues.clone(),
                _ => {
                    return Err(Error::Config(
                        "a feature run needs explicit issues unless architecture mode is enabled"
                            .to_string(),
                    ))
                }
            }
        };

        let mut tasks = HashMap::new();
        for number in issue_numbers {
            let issue = self.tracker.get_issue(number).await?;
            let dependencies = issue.dependencies();
            let task = FeatureTask::new(number, issue.title, issue.body)
                .with_dependencies(dependencies)
                .with_max_attempts(self.config.scheduler.max_attempts);
            tasks.insert(number, task);
        }

        info!(count = tasks.len(), "expanded feature into tasks");
        Ok(tasks)
    }

    /// Architecture mode: let the arch agent plan and file the issues
    async fn run_architecture_phase(
        &self,
        spec: &FeatureSpec,
        setup: &WorktreeSetup,
    ) -> Result<Vec<u64>> {
        let context = PromptContext::new()
            .with_feature(&spec.name)
            .with("FEATURE_DESCRIPTION", &spec.description)
            .with("BASE_BRANCH", &spec.base_branch);
        let prompt = agent::render(AgentKind::Arch, &context);

        let agent_id = format!("arch-{}", spec.name);
        let output = self
            .invoke_logged(AgentKind::Arch, &agent_id, &prompt, setup, spec, None)
            .await?;

        let numbers = agent::extract_issue_numbers(&output.stdout);
        if numbers.is_empty() {
            return Err(Error::Other(
                "architecture phase reported no created issues".to_string(),
            ));
        }

        info!(?numbers, "architecture phase planned issues");
        Ok(numbers)
    }

    /// One full attempt for one task: solve, commit, read back PR, review
    async fn run_task(
        &self,
        issue: u64,
        spec: &FeatureSpec,
        setup: &WorktreeSetup,
        tasks: &TaskMap,
    ) -> Result<()> {
        let (attempt, max_attempts, title, description, feedback_text) = {
            let mut guard = tasks.lock().await;
            let task = guard
                .get_mut(&issue)
                .ok_or_else(|| Error::Other(format!("unknown task #{}", issue)))?;
            let attempt = task.begin_attempt();
            task.worktree_path = Some(setup.path.clone());
            let feedback_text = if attempt > 1 {
                feedback::synthesize(&task.review_history, attempt)
            } else {
                String::new()
            };
            (
                attempt,
                task.max_attempts,
                task.title.clone(),
                task.description.clone(),
                feedback_text,
            )
        };

        info!(issue, attempt, "task solving");
        self.store.update_issue(issue, |i| {
            i.status = TaskStatus::Solving.name().to_string();
            i.attempts = attempt;
        });

        let branch = self
            .worktrees
            .setup_issue_branch(&setup.path, &spec.name, issue)
            .await
            .map_err(|e| Error::TaskFailed {
                issue,
                reason: format!("issue branch setup failed: {}", e),
            })?;
        {
            let mut guard = tasks.lock().await;
            if let Some(task) = guard.get_mut(&issue) {
                task.branch = Some(branch.clone());
            }
        }

        let context = PromptContext::new()
            .with_feature(&spec.name)
            .with_issue(issue, &title)
            .with("ISSUE_DESCRIPTION", &description)
            .with("BRANCH", &branch)
            .with_attempt(attempt, max_attempts)
            .with_feedback(&feedback_text);
        let prompt = agent::render(AgentKind::Solver, &context);

        let agent_id = format!("solver-{}-attempt-{}", issue, attempt);
        let output = self
            .invoke_logged(AgentKind::Solver, &agent_id, &prompt, setup, spec, Some(issue))
            .await
            .map_err(|e| Error::TaskFailed {
                issue,
                reason: format!("solver failed: {}", e),
            })?;

        let committed = self
            .worktrees
            .commit_issue_changes(&setup.path, &spec.name, issue)
            .await
            .map_err(|e| Error::TaskFailed {
                issue,
                reason: format!("commit failed: {}", e),
            })?;
        if !committed {
            info!(issue, "solver made no tree changes");
        }

        // the PR is the reviewable artifact; a solve without one is fatal
        let pr_number = match agent::extract_pr_number(&output.stdout) {
            Some(number) => Some(number),
            None => self
                .tracker
                .find_pr_by_branch(&branch)
                .await?
                .map(|pr| pr.number),
        };
        let Some(pr_number) = pr_number else {
            return Err(Error::TaskFailed {
                issue,
                reason: "solver did not produce a pull request".to_string(),
            });
        };

        {
            let mut guard = tasks.lock().await;
            if let Some(task) = guard.get_mut(&issue) {
                task.pr_number = Some(pr_number);
                task.status = TaskStatus::Reviewing;
            }
        }
        self.store.update_issue(issue, |i| {
            i.status = TaskStatus::Reviewing.name().to_string();
            i.pr_number = Some(pr_number);
        });

        let reviews = self
            .review_round(issue, pr_number, spec, setup, &title, attempt)
            .await?;
        let all_approved = reviews
            .iter()
            .all(|r| r.result == ReviewDecision::Approve);

        let mut guard = tasks.lock().await;
        let task = guard
            .get_mut(&issue)
            .ok_or_else(|| Error::Other(format!("unknown task #{}", issue)))?;
        task.review_history.extend(reviews);

        if all_approved {
            task.status = TaskStatus::Approved;
            self.store.update_issue(issue, |i| {
                i.status = TaskStatus::Approved.name().to_string();
            });

            task.status = TaskStatus::Completed;
            self.store.update_issue(issue, |i| {
                i.status = TaskStatus::Completed.name().to_string();
            });
            info!(issue, attempt, "task completed");
            return Ok(());
        }

        task.status = TaskStatus::Rejected;
        self.store.update_issue(issue, |i| {
            i.status = TaskStatus::Rejected.name().to_string();
        });

        if task.attempts_exhausted() {
            warn!(issue, attempts = task.attempts, "attempts exhausted");
            return Err(Error::RetriesExhausted {
                issue,
                attempts: task.attempts,
            });
        }

        // requeue for another attempt; accumulated history feeds synthesis
        task.status = TaskStatus::Pending;
        self.store.update_issue(issue, |i| {
            i.status = TaskStatus::Pending.name().to_string();
        });
        info!(issue, attempt, "task rejected, requeued");
        Ok(())
    }

    /// One review round: every configured profile, in fixed order, all
    /// collected before any decision
    async fn review_round(
        &self,
        issue: u64,
        pr_number: u64,
        spec: &FeatureSpec,
        setup: &WorktreeSetup,
        title: &str,
        attempt: u32,
    ) -> Result<Vec<TaskReview>> {
        let mut reviews = Vec::new();

        for profile in &self.config.scheduler.reviewer_profiles {
            let context = PromptContext::new()
                .with_feature(&spec.name)
                .with_issue(issue, title)
                .with("PR_NUMBER", pr_number.to_string())
                .with("REVIEWER_PROFILE", profile);
            let prompt = agent::render(AgentKind::Reviewer, &context);

            let agent_id = format!("reviewer-{}-{}-attempt-{}", profile, issue, attempt);
            let output = self
                .invoke_logged(
                    AgentKind::Reviewer,
                    &agent_id,
                    &prompt,
                    setup,
                    spec,
                    Some(issue),
                )
                .await
                .map_err(|e| Error::TaskFailed {
                    issue,
                    reason: format!("reviewer '{}' failed: {}", profile, e),
                })?;

            let outcome = agent::parse_review_outcome(&output.stdout);
            if outcome == agent::ParsedOutcome::Ambiguous {
                warn!(issue, profile = %profile, "ambiguous review output, failing closed");
            }
            let decision = outcome.decision_or_reject();

            reviews.push(TaskReview {
                reviewer_id: profile.clone(),
                result: decision,
                comments: output.stdout,
                timestamp: Utc::now(),
                pr_number: Some(pr_number),
            });
        }

        Ok(reviews)
    }

    /// Invoke an agent with its lifecycle mirrored into the store
    async fn invoke_logged(
        &self,
        kind: AgentKind,
        agent_id: &str,
        prompt: &str,
        setup: &WorktreeSetup,
        spec: &FeatureSpec,
        issue: Option<u64>,
    ) -> Result<AgentOutput> {
        let mut status = AgentStatus::new(agent_id, kind.name()).with_feature(&spec.name);
        if let Some(number) = issue {
            status = status.with_issue(number);
        }
        status.start();
        self.store.put_agent(status);

        let mut sink = StoreSink {
            store: Arc::clone(&self.store),
            agent_id: agent_id.to_string(),
        };
        let result = self.runner.invoke(kind, prompt, &setup.path, &mut sink).await;

        match &result {
            Ok(_) => {
                self.store.update_agent(agent_id, |a| a.complete());
            }
            Err(e) => {
                let message = e.to_string();
                self.store.update_agent(agent_id, move |a| a.fail(message));
            }
        }

        result
    }

    /// Aggregate PR for a parent feature, after every task completed
    async fn open_parent_pr(
        &self,
        spec: &FeatureSpec,
        setup: &WorktreeSetup,
        tasks: &TaskMap,
    ) -> Result<()> {
        let body = {
            let guard = tasks.lock().await;
            let mut numbers: Vec<u64> = guard.keys().copied().collect();
            numbers.sort_unstable();

            let mut body = format!("Completes feature `{}`.\n\nIssues:\n", spec.name);
            for number in numbers {
                if let Some(task) = guard.get(&number) {
                    let pr = task
                        .pr_number
                        .map(|n| format!(" (PR #{})", n))
                        .unwrap_or_default();
                    body.push_str(&format!("- #{}: {}{}\n", number, task.title, pr));
                }
            }
            body
        };

        let request = CreatePr {
            title: format!("Feature: {}", spec.name),
            body,
            base: spec.base_branch.clone(),
            head: setup.branch.clone(),
        };

        let pr = self.tracker.create_pr(&request).await?;
        info!(pr = pr.number, "opened aggregate feature PR");
        Ok(())
    }
}
