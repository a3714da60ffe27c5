//! Drover State - persistent, event-emitting run state
//!
//! The in-memory store is authoritative for a running process; persistence is
//! a best-effort, debounced snapshot to a versioned JSON document. Every
//! mutation emits a change event so external layers (WebSocket broadcaster,
//! UI) can follow along without polling.

pub mod error;
pub mod events;
pub mod models;
pub mod persist;
pub mod store;

pub use error::{Error, Result};
pub use events::{ChangeAction, ChangeEvent, EntityKind, EventSink};
pub use models::{
    AgentRunStatus, AgentStatus, FeatureRecord, FeatureStatus, IssueRecord, SessionRecord,
    WorktreeRecord, WorktreeStatus,
};
pub use persist::{StateSnapshot, STATE_SCHEMA_VERSION};
pub use store::{StateStore, StateStoreBuilder};
