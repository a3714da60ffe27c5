//! Configuration management for Drover
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (DROVER_*)
//! 3. Config file (~/.config/drover/config.toml)
//! 4. Default values

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Agent subprocess configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path to the code agent executable
    pub agent_path: String,

    /// Model to pass through to the agent
    pub model: Option<String>,

    /// Run the agent with its permission prompts bypassed
    pub bypass_permissions: bool,

    /// Hard timeout for one agent invocation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_path: "claude".to_string(),
            model: None,
            bypass_permissions: true,
            timeout: Duration::from_secs(3600),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently active tasks
    pub max_concurrent_tasks: usize,

    /// Solve attempts allowed per task before the run fails
    pub max_attempts: u32,

    /// Reviewer profiles; one review invocation per profile, in this order
    pub reviewer_profiles: Vec<String>,

    /// Dispatch loop poll interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Grace window between SIGTERM and SIGKILL on cancellation
    #[serde(with = "humantime_serde")]
    pub kill_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
            max_attempts: 3,
            reviewer_profiles: vec!["general".to_string()],
            poll_interval: Duration::from_secs(2),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// Worktree configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorktreeConfig {
    /// Root directory holding feature worktrees
    ///
    /// Defaults to `~/.cache/drover/worktrees`.
    pub root: Option<PathBuf>,

    /// Name of the in-repo context directory written by agents
    pub context_dir: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            root: None,
            context_dir: ".drover".to_string(),
        }
    }
}

impl WorktreeConfig {
    /// Resolve the worktree root, falling back to the cache directory
    pub fn resolved_root(&self) -> Result<PathBuf> {
        if let Some(ref root) = self.root {
            return Ok(root.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Config("Could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("drover").join("worktrees"))
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Agent configuration
    pub agent: AgentConfig,
    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Worktree configuration
    pub worktree: WorktreeConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if the file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/drover/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("drover").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - DROVER_AGENT_PATH: path to the agent executable
    /// - DROVER_MODEL: model to use
    /// - DROVER_MAX_CONCURRENT: max concurrently active tasks
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(agent_path) = std::env::var("DROVER_AGENT_PATH") {
            self.agent.agent_path = agent_path;
        }

        if let Ok(model) = std::env::var("DROVER_MODEL") {
            self.agent.model = Some(model);
        }

        if let Ok(max) = std::env::var("DROVER_MAX_CONCURRENT") {
            if let Ok(max) = max.parse() {
                self.scheduler.max_concurrent_tasks = max;
            }
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        agent_path: Option<String>,
        model: Option<String>,
        max_concurrent: Option<usize>,
    ) -> Self {
        if let Some(path) = agent_path {
            self.agent.agent_path = path;
        }

        if let Some(m) = model {
            self.agent.model = Some(m);
        }

        if let Some(max) = max_concurrent {
            self.scheduler.max_concurrent_tasks = max;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        agent_path: Option<String>,
        model: Option<String>,
        max_concurrent: Option<usize>,
    ) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()
            .with_cli_overrides(agent_path, model, max_concurrent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.agent.agent_path, "claude");
        assert!(config.agent.model.is_none());
        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.agent.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::default().with_cli_overrides(
            Some("/custom/agent".to_string()),
            Some("opus".to_string()),
            Some(4),
        );

        assert_eq!(config.agent.agent_path, "/custom/agent");
        assert_eq!(config.agent.model, Some("opus".to_string()));
        assert_eq!(config.scheduler.max_concurrent_tasks, 4);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[agent]
agent_path = "/usr/local/bin/claude"
timeout = "30m"

[scheduler]
max_concurrent_tasks = 3
reviewer_profiles = ["frontend", "backend", "devops"]
poll_interval = "5s"

[worktree]
context_dir = ".drover"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.agent.agent_path, "/usr/local/bin/claude");
        assert_eq!(config.agent.timeout, Duration::from_secs(1800));
        assert_eq!(config.scheduler.max_concurrent_tasks, 3);
        assert_eq!(config.scheduler.reviewer_profiles.len(), 3);
        assert_eq!(config.scheduler.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml() {
        let toml = r#"
[scheduler]
max_attempts = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        // unspecified sections use defaults
        assert_eq!(config.agent.agent_path, "claude");
        assert_eq!(config.scheduler.max_attempts, 5);
        assert_eq!(config.scheduler.max_concurrent_tasks, 2);
    }

    #[test]
    fn test_worktree_root_resolution() {
        let config = WorktreeConfig {
            root: Some(PathBuf::from("/tmp/worktrees")),
            ..Default::default()
        };
        assert_eq!(config.resolved_root().unwrap(), PathBuf::from("/tmp/worktrees"));

        let default_root = WorktreeConfig::default().resolved_root().unwrap();
        assert!(default_root.to_str().unwrap().contains("drover"));
    }
}
