//! Change events emitted on every store mutation

use serde::{Deserialize, Serialize};

/// Which collection an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Agent,
    Feature,
    Issue,
    Worktree,
    Config,
    Session,
}

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// A single store mutation, emitted in mutation order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Collection the mutation touched
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Mutation kind
    pub action: ChangeAction,
    /// Key of the mutated entity
    pub id: String,
    /// Entity payload after the mutation (`null` for deletes)
    pub data: serde_json::Value,
}

/// Subscription interface injected into the store
///
/// The store calls `publish` synchronously under its write lock so events
/// observe mutation order; implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ChangeEvent);
}

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &ChangeEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = ChangeEvent {
            kind: EntityKind::Issue,
            action: ChangeAction::Update,
            id: "10".to_string(),
            data: serde_json::json!({"status": "solving"}),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "issue");
        assert_eq!(json["action"], "update");
        assert_eq!(json["id"], "10");
        assert_eq!(json["data"]["status"], "solving");
    }
}
