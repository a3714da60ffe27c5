//! Agent subprocess invocation
//!
//! One invocation = write the prompt to a file in the working directory, run
//! the agent binary with the prompt on stdin, stream stdout line by line, and
//! enforce a hard timeout. The prompt file is deleted after the call for
//! every agent kind, success or failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::agent::AgentKind;
use crate::config::AgentConfig;
use crate::procs::ProcessRegistry;
use crate::{Error, Result};

static PROMPT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Prefix of temporary prompt files written into agent working directories
pub const PROMPT_FILE_PREFIX: &str = ".drover-prompt-";

/// Result of a completed agent invocation
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// Accumulated standard output
    pub stdout: String,
    /// Accumulated standard error
    pub stderr: String,
    /// Process exit code
    pub exit_code: i32,
}

/// Receives agent output lines as they arrive
///
/// The agent process typically buffers and flushes near completion, so sinks
/// must not assume streaming granularity.
pub trait OutputSink: Send {
    fn on_line(&mut self, line: &str);
}

/// Sink that discards all output
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn on_line(&mut self, _line: &str) {}
}

/// The invocation seam the scheduler depends on; tests swap in a fake
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one agent to completion in the given working directory
    async fn invoke(
        &self,
        kind: AgentKind,
        prompt: &str,
        workdir: &Path,
        sink: &mut (dyn OutputSink + Send),
    ) -> Result<AgentOutput>;
}

/// Invoker for the external code agent binary
#[derive(Debug, Clone)]
pub struct AgentInvoker {
    config: AgentConfig,
    registry: ProcessRegistry,
}

impl AgentInvoker {
    /// Create an invoker registering children with the given registry
    pub fn new(config: AgentConfig, registry: ProcessRegistry) -> Self {
        Self { config, registry }
    }

    fn prompt_path(&self, kind: AgentKind, workdir: &Path) -> PathBuf {
        let seq = PROMPT_SEQ.fetch_add(1, Ordering::Relaxed);
        workdir.join(format!("{}{}-{}.md", PROMPT_FILE_PREFIX, kind.name(), seq))
    }

    fn build_command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.agent_path);
        cmd.arg("--print");

        if self.config.bypass_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }

        if let Some(ref model) = self.config.model {
            cmd.arg("--model").arg(model);
        }

        cmd.current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd
    }

    async fn run(
        &self,
        kind: AgentKind,
        prompt: &str,
        workdir: &Path,
        sink: &mut (dyn OutputSink + Send),
    ) -> Result<AgentOutput> {
        let mut child = self.build_command(workdir).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Agent(format!(
                    "Agent executable not found at '{}'. Is it installed?",
                    self.config.agent_path
                ))
            } else {
                Error::Io(e)
            }
        })?;

        let pid = child.id();
        if let Some(pid) = pid {
            self.registry.register(pid, format!("{} agent", kind));
        }

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Agent("Failed to capture agent stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Agent("Failed to capture agent stderr".to_string()))?;

        let result = tokio::time::timeout(self.config.timeout, async {
            // feed the prompt concurrently with reading, so a large prompt
            // cannot deadlock against a full stdout pipe
            let feed_stdin = async {
                if let Some(mut stdin) = stdin {
                    let _ = stdin.write_all(prompt.as_bytes()).await;
                    // closing stdin signals end of prompt
                }
            };

            let collect_stdout = async {
                let mut collected = String::new();
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    sink.on_line(&line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            };

            let collect_stderr = async {
                let mut collected = String::new();
                let _ = BufReader::new(stderr).read_to_string(&mut collected).await;
                collected
            };

            let (_, out, err) = tokio::join!(feed_stdin, collect_stdout, collect_stderr);
            let status = child.wait().await?;
            Ok::<_, Error>((out, err, status))
        })
        .await;

        if let Some(pid) = pid {
            self.registry.unregister(pid);
        }

        let (stdout, stderr, status) = match result {
            Ok(inner) => inner?,
            Err(_elapsed) => {
                warn!(kind = %kind, "agent timed out, killing subprocess");
                let _ = child.kill().await;
                return Err(Error::AgentTimeout(self.config.timeout.as_secs()));
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        debug!(kind = %kind, exit_code, "agent completed");

        if !status.success() {
            return Err(Error::Agent(format!(
                "{} agent exited with code {}: {}",
                kind,
                exit_code,
                stderr.trim()
            )));
        }

        if stdout.trim().is_empty() {
            return Err(Error::Agent(format!("{} agent produced no output", kind)));
        }

        Ok(AgentOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[async_trait]
impl AgentRunner for AgentInvoker {
    async fn invoke(
        &self,
        kind: AgentKind,
        prompt: &str,
        workdir: &Path,
        sink: &mut (dyn OutputSink + Send),
    ) -> Result<AgentOutput> {
        if !workdir.exists() {
            return Err(Error::Agent(format!(
                "Working directory does not exist: {}",
                workdir.display()
            )));
        }

        let prompt_file = self.prompt_path(kind, workdir);
        tokio::fs::write(&prompt_file, prompt).await?;

        let outcome = self.run(kind, prompt, workdir, sink).await;

        // uniform cleanup for every kind, success or failure
        if let Err(e) = tokio::fs::remove_file(&prompt_file).await {
            warn!(path = %prompt_file.display(), "failed to remove prompt file: {}", e);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn invoker_with(path: &str, timeout: Duration) -> AgentInvoker {
        let config = AgentConfig {
            agent_path: path.to_string(),
            timeout,
            ..Default::default()
        };
        AgentInvoker::new(config, ProcessRegistry::new([std::process::id()]))
    }

    struct CollectSink(Vec<String>);

    impl OutputSink for CollectSink {
        fn on_line(&mut self, line: &str) {
            self.0.push(line.to_string());
        }
    }

    #[tokio::test]
    async fn test_invoke_missing_workdir() {
        let invoker = invoker_with("true", Duration::from_secs(5));
        let mut sink = NullSink;
        let result = invoker
            .invoke(
                AgentKind::Solver,
                "prompt",
                Path::new("/nonexistent/path/12345"),
                &mut sink,
            )
            .await;
        assert!(matches!(result, Err(Error::Agent(_))));
    }

    #[tokio::test]
    async fn test_invoke_missing_binary() {
        let dir = TempDir::new().unwrap();
        let invoker = invoker_with("/nonexistent/agent-binary", Duration::from_secs(5));
        let mut sink = NullSink;
        let result = invoker
            .invoke(AgentKind::Solver, "prompt", dir.path(), &mut sink)
            .await;
        assert!(matches!(result, Err(Error::Agent(_))));
        // prompt file cleanup happens even on spawn failure
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    /// Write an executable stub standing in for the agent binary. The stub
    /// receives the real flags and ignores them.
    #[cfg(unix)]
    fn fake_agent(dir: &TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("fake-agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_captures_output_lines() {
        let bin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let invoker = invoker_with(&fake_agent(&bin_dir, "cat"), Duration::from_secs(5));
        let mut sink = CollectSink(Vec::new());

        let output = invoker
            .invoke(AgentKind::Reviewer, "line one\nline two", work_dir.path(), &mut sink)
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("line one"));
        assert_eq!(sink.0.len(), 2);
        // prompt file removed after the call
        let leftovers: Vec<_> = std::fs::read_dir(work_dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_empty_output_is_error() {
        let bin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let invoker = invoker_with(&fake_agent(&bin_dir, "exit 0"), Duration::from_secs(5));
        let mut sink = NullSink;

        let result = invoker
            .invoke(AgentKind::Solver, "prompt", work_dir.path(), &mut sink)
            .await;
        assert!(matches!(result, Err(Error::Agent(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_nonzero_exit_is_error() {
        let bin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let invoker = invoker_with(
            &fake_agent(&bin_dir, "echo partial; echo broken >&2; exit 3"),
            Duration::from_secs(5),
        );
        let mut sink = NullSink;

        let result = invoker
            .invoke(AgentKind::Solver, "prompt", work_dir.path(), &mut sink)
            .await;
        match result {
            Err(Error::Agent(message)) => assert!(message.contains("broken")),
            other => panic!("expected agent error, got {:?}", other.map(|o| o.exit_code)),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_timeout_kills_agent() {
        let bin_dir = TempDir::new().unwrap();
        let work_dir = TempDir::new().unwrap();
        let invoker = invoker_with(&fake_agent(&bin_dir, "sleep 30"), Duration::from_millis(200));

        let start = std::time::Instant::now();
        let mut sink = NullSink;
        let result = invoker
            .invoke(AgentKind::Solver, "prompt", work_dir.path(), &mut sink)
            .await;

        assert!(matches!(result, Err(Error::AgentTimeout(_))));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_prompt_paths_are_unique_and_root_level() {
        let invoker = invoker_with("true", Duration::from_secs(1));
        let a = invoker.prompt_path(AgentKind::Solver, Path::new("/wt"));
        let b = invoker.prompt_path(AgentKind::Solver, Path::new("/wt"));
        assert_ne!(a, b);
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with(".drover-prompt-solver-"));
        assert_eq!(a.parent(), Some(Path::new("/wt")));
    }
}
