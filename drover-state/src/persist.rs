//! Versioned JSON snapshot persistence

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::{AgentStatus, FeatureRecord, IssueRecord, SessionRecord, WorktreeRecord};
use crate::{Error, Result};

/// Current on-disk schema version
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// The full persisted state: five keyed collections plus a schema version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Schema version of this document
    pub version: u32,
    /// Agent statuses keyed by agent id
    #[serde(default)]
    pub agents: HashMap<String, AgentStatus>,
    /// Feature runs keyed by feature name
    #[serde(default)]
    pub features: HashMap<String, FeatureRecord>,
    /// Issue records keyed by issue number
    #[serde(default)]
    pub issues: HashMap<u64, IssueRecord>,
    /// Worktrees keyed by name
    #[serde(default)]
    pub worktrees: HashMap<String, WorktreeRecord>,
    /// Sessions keyed by session id
    #[serde(default)]
    pub sessions: HashMap<String, SessionRecord>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_SCHEMA_VERSION,
            agents: HashMap::new(),
            features: HashMap::new(),
            issues: HashMap::new(),
            worktrees: HashMap::new(),
            sessions: HashMap::new(),
        }
    }
}

/// Default state file location: `<data dir>/drover/state.json`
pub fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drover")
        .join("state.json")
}

/// Load a snapshot from disk.
///
/// A missing file yields an empty snapshot; a version this build does not
/// understand is an error rather than a silent reinterpretation.
pub fn load(path: &Path) -> Result<StateSnapshot> {
    if !path.exists() {
        return Ok(StateSnapshot::default());
    }

    let contents = std::fs::read_to_string(path)?;
    let snapshot: StateSnapshot = serde_json::from_str(&contents)?;

    if snapshot.version != STATE_SCHEMA_VERSION {
        return Err(Error::SchemaVersion {
            found: snapshot.version,
            expected: STATE_SCHEMA_VERSION,
        });
    }

    Ok(snapshot)
}

/// Write a snapshot atomically: serialize to a sibling temp file, then rename.
pub async fn save_atomic(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");

    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentStatus, FeatureRecord, IssueRecord, SessionRecord, WorktreeRecord};
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let snapshot = load(&dir.path().join("state.json")).unwrap();
        assert_eq!(snapshot.version, STATE_SCHEMA_VERSION);
        assert!(snapshot.agents.is_empty());
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"version": 99}"#).unwrap();

        let result = load(&path);
        assert!(matches!(
            result,
            Err(Error::SchemaVersion { found: 99, expected: 1 })
        ));
    }

    #[tokio::test]
    async fn test_round_trip_all_collections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut snapshot = StateSnapshot::default();
        snapshot
            .agents
            .insert("solver-10".into(), AgentStatus::new("solver-10", "solver"));
        snapshot
            .features
            .insert("pay".into(), FeatureRecord::new("pay", "payments", "main"));
        snapshot
            .issues
            .insert(10, IssueRecord::new(10, "pay", "Add checkout"));
        snapshot.worktrees.insert(
            "pay".into(),
            WorktreeRecord::new("pay", "/tmp/wt/pay", "feature/pay", "pay"),
        );
        let session = SessionRecord::generate();
        snapshot.sessions.insert(session.id.clone(), session);

        save_atomic(&path, &snapshot).await.unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.agents.keys().collect::<Vec<_>>(), vec!["solver-10"]);
        assert_eq!(loaded.features["pay"].base_branch, "main");
        assert_eq!(loaded.issues[&10].title, "Add checkout");
        assert_eq!(loaded.worktrees["pay"].branch, "feature/pay");
        assert_eq!(loaded.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut snapshot = StateSnapshot::default();
        snapshot
            .issues
            .insert(1, IssueRecord::new(1, "pay", "first"));
        save_atomic(&path, &snapshot).await.unwrap();

        snapshot.issues.remove(&1);
        snapshot
            .issues
            .insert(2, IssueRecord::new(2, "pay", "second"));
        save_atomic(&path, &snapshot).await.unwrap();

        let loaded = load(&path).unwrap();
        assert!(!loaded.issues.contains_key(&1));
        assert!(loaded.issues.contains_key(&2));
    }
}
