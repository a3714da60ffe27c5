//! The state store: in-memory authoritative state, debounced persistence,
//! change-event emission
//!
//! All CRUD is synchronous over an in-process lock; only persistence is
//! asynchronous. A single writer task coalesces bursts of save requests into
//! one snapshot write and drains the queue on shutdown, so the final state of
//! a run is never lost to a pending debounce timer.

use std::path::PathBuf;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::events::{ChangeAction, ChangeEvent, EntityKind, EventSink};
use crate::models::{
    AgentStatus, FeatureRecord, IssueRecord, SessionRecord, WorktreeRecord,
};
use crate::persist::{self, StateSnapshot};
use crate::Result;

/// Debounce window for coalescing snapshot writes
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Sessions idle longer than this are removed on initialize
pub const SESSION_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Capacity of the change-event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;


/// Serialize a record for an event payload; never fails the mutation.
fn event_data<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

enum WriterMessage {
    Save,
    Shutdown(oneshot::Sender<()>),
}

/// Builder for [`StateStore`]
pub struct StateStoreBuilder {
    path: PathBuf,
    session_max_age: Duration,
    debounce: Duration,
    sink: Option<Box<dyn EventSink>>,
}

impl StateStoreBuilder {
    /// Store state at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session_max_age: SESSION_MAX_AGE,
            debounce: SAVE_DEBOUNCE,
            sink: None,
        }
    }

    /// Override the session expiry age
    pub fn with_session_max_age(mut self, max_age: Duration) -> Self {
        self.session_max_age = max_age;
        self
    }

    /// Override the save debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Inject an event sink receiving every change event
    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Load state from disk, sweep expired sessions and start the writer task
    pub fn build(self) -> Result<Arc<StateStore>> {
        let mut snapshot = persist::load(&self.path)?;

        let expired: Vec<String> = snapshot
            .sessions
            .iter()
            .filter(|(_, s)| s.is_expired(self.session_max_age))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            snapshot.sessions.remove(id);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired sessions");
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let store = Arc::new(StateStore {
            path: self.path,
            snapshot: RwLock::new(snapshot),
            events,
            sink: self.sink,
            writer_tx,
        });

        tokio::spawn(writer_loop(
            Arc::downgrade(&store),
            writer_rx,
            self.debounce,
        ));

        Ok(store)
    }
}

/// In-memory authoritative state with best-effort persistence
pub struct StateStore {
    path: PathBuf,
    snapshot: RwLock<StateSnapshot>,
    events: broadcast::Sender<ChangeEvent>,
    sink: Option<Box<dyn EventSink>>,
    writer_tx: mpsc::UnboundedSender<WriterMessage>,
}

impl StateStore {
    /// Open the store at the default location
    pub fn open_default() -> Result<Arc<Self>> {
        StateStoreBuilder::new(persist::default_state_path()).build()
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Clone the full current snapshot
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.read().expect("state lock poisoned").clone()
    }

    /// Flush pending writes and stop the writer task
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.writer_tx.send(WriterMessage::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    fn emit(&self, kind: EntityKind, action: ChangeAction, id: String, data: serde_json::Value) {
        let event = ChangeEvent { kind, action, id, data };
        if let Some(ref sink) = self.sink {
            sink.publish(&event);
        }
        // send fails only when nobody subscribed, which is fine
        let _ = self.events.send(event);
        let _ = self.writer_tx.send(WriterMessage::Save);
    }

    // --- agents ---

    /// Insert or replace an agent status
    pub fn put_agent(&self, agent: AgentStatus) {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let action = if state.agents.contains_key(&agent.id) {
            ChangeAction::Update
        } else {
            ChangeAction::Create
        };
        let id = agent.id.clone();
        let data = event_data(&agent);
        state.agents.insert(id.clone(), agent);
        self.emit(EntityKind::Agent, action, id, data);
    }

    /// Mutate an agent status in place; returns false when absent
    pub fn update_agent(&self, id: &str, mutate: impl FnOnce(&mut AgentStatus)) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let Some(agent) = state.agents.get_mut(id) else {
            return false;
        };
        mutate(agent);
        let data = event_data(agent);
        self.emit(EntityKind::Agent, ChangeAction::Update, id.to_string(), data);
        true
    }

    /// Append an output line to an agent's bounded log
    pub fn append_agent_log(&self, id: &str, line: &str) -> bool {
        self.update_agent(id, |agent| agent.append_log(line))
    }

    /// Fetch an agent status
    pub fn get_agent(&self, id: &str) -> Option<AgentStatus> {
        self.snapshot
            .read()
            .expect("state lock poisoned")
            .agents
            .get(id)
            .cloned()
    }

    /// List all agent statuses
    pub fn list_agents(&self) -> Vec<AgentStatus> {
        self.snapshot
            .read()
            .expect("state lock poisoned")
            .agents
            .values()
            .cloned()
            .collect()
    }

    /// Delete an agent status
    pub fn delete_agent(&self, id: &str) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let removed = state.agents.remove(id).is_some();
        if removed {
            self.emit(
                EntityKind::Agent,
                ChangeAction::Delete,
                id.to_string(),
                serde_json::Value::Null,
            );
        }
        removed
    }

    // --- features ---

    /// Insert or replace a feature record
    pub fn put_feature(&self, feature: FeatureRecord) {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let action = if state.features.contains_key(&feature.name) {
            ChangeAction::Update
        } else {
            ChangeAction::Create
        };
        let id = feature.name.clone();
        let data = event_data(&feature);
        state.features.insert(id.clone(), feature);
        self.emit(EntityKind::Feature, action, id, data);
    }

    /// Mutate a feature record in place; returns false when absent
    pub fn update_feature(&self, name: &str, mutate: impl FnOnce(&mut FeatureRecord)) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let Some(feature) = state.features.get_mut(name) else {
            return false;
        };
        mutate(feature);
        let data = event_data(feature);
        self.emit(
            EntityKind::Feature,
            ChangeAction::Update,
            name.to_string(),
            data,
        );
        true
    }

    /// Fetch a feature record
    pub fn get_feature(&self, name: &str) -> Option<FeatureRecord> {
        self.snapshot
            .read()
            .expect("state lock poisoned")
            .features
            .get(name)
            .cloned()
    }

    /// Delete a feature record
    pub fn delete_feature(&self, name: &str) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let removed = state.features.remove(name).is_some();
        if removed {
            self.emit(
                EntityKind::Feature,
                ChangeAction::Delete,
                name.to_string(),
                serde_json::Value::Null,
            );
        }
        removed
    }

    // --- issues ---

    /// Insert or replace an issue record
    pub fn put_issue(&self, issue: IssueRecord) {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let action = if state.issues.contains_key(&issue.number) {
            ChangeAction::Update
        } else {
            ChangeAction::Create
        };
        let id = issue.number.to_string();
        let data = event_data(&issue);
        state.issues.insert(issue.number, issue);
        self.emit(EntityKind::Issue, action, id, data);
    }

    /// Mutate an issue record in place; returns false when absent
    pub fn update_issue(&self, number: u64, mutate: impl FnOnce(&mut IssueRecord)) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let Some(issue) = state.issues.get_mut(&number) else {
            return false;
        };
        mutate(issue);
        issue.updated_at = chrono::Utc::now();
        let data = event_data(issue);
        self.emit(
            EntityKind::Issue,
            ChangeAction::Update,
            number.to_string(),
            data,
        );
        true
    }

    /// Fetch an issue record
    pub fn get_issue(&self, number: u64) -> Option<IssueRecord> {
        self.snapshot
            .read()
            .expect("state lock poisoned")
            .issues
            .get(&number)
            .cloned()
    }

    /// Delete an issue record
    pub fn delete_issue(&self, number: u64) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let removed = state.issues.remove(&number).is_some();
        if removed {
            self.emit(
                EntityKind::Issue,
                ChangeAction::Delete,
                number.to_string(),
                serde_json::Value::Null,
            );
        }
        removed
    }

    // --- worktrees ---

    /// Insert or replace a worktree record
    pub fn put_worktree(&self, worktree: WorktreeRecord) {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let action = if state.worktrees.contains_key(&worktree.name) {
            ChangeAction::Update
        } else {
            ChangeAction::Create
        };
        let id = worktree.name.clone();
        let data = event_data(&worktree);
        state.worktrees.insert(id.clone(), worktree);
        self.emit(EntityKind::Worktree, action, id, data);
    }

    /// Fetch a worktree record
    pub fn get_worktree(&self, name: &str) -> Option<WorktreeRecord> {
        self.snapshot
            .read()
            .expect("state lock poisoned")
            .worktrees
            .get(name)
            .cloned()
    }

    /// Delete a worktree record
    pub fn delete_worktree(&self, name: &str) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let removed = state.worktrees.remove(name).is_some();
        if removed {
            self.emit(
                EntityKind::Worktree,
                ChangeAction::Delete,
                name.to_string(),
                serde_json::Value::Null,
            );
        }
        removed
    }

    // --- sessions ---

    /// Create and store a fresh session
    pub fn create_session(&self) -> SessionRecord {
        let session = SessionRecord::generate();
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let data = event_data(&session);
        state.sessions.insert(session.id.clone(), session.clone());
        self.emit(
            EntityKind::Session,
            ChangeAction::Create,
            session.id.clone(),
            data,
        );
        session
    }

    /// Validate a session token and refresh its last access time
    pub fn validate_session(&self, id: &str, token: &str, max_age: Duration) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let Some(session) = state.sessions.get_mut(id) else {
            return false;
        };
        if session.token != token || session.is_expired(max_age) {
            return false;
        }
        session.last_access = chrono::Utc::now();
        let data = event_data(session);
        self.emit(
            EntityKind::Session,
            ChangeAction::Update,
            id.to_string(),
            data,
        );
        true
    }

    /// Delete a session
    pub fn delete_session(&self, id: &str) -> bool {
        let mut state = self.snapshot.write().expect("state lock poisoned");
        let removed = state.sessions.remove(id).is_some();
        if removed {
            self.emit(
                EntityKind::Session,
                ChangeAction::Delete,
                id.to_string(),
                serde_json::Value::Null,
            );
        }
        removed
    }
}

/// Writer task: debounce save requests, write one snapshot per burst,
/// final write on shutdown. Persistence failures are logged, never raised.
async fn writer_loop(
    store: Weak<StateStore>,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    debounce: Duration,
) {
    loop {
        let Some(message) = rx.recv().await else {
            break;
        };

        let shutdown_ack = match message {
            WriterMessage::Save => {
                tokio::time::sleep(debounce).await;
                // coalesce everything that arrived during the window
                let mut ack = None;
                while let Ok(queued) = rx.try_recv() {
                    if let WriterMessage::Shutdown(tx) = queued {
                        ack = Some(tx);
                        break;
                    }
                }
                ack
            }
            WriterMessage::Shutdown(tx) => Some(tx),
        };

        let Some(store) = store.upgrade() else {
            break;
        };

        let snapshot = store.snapshot();
        if let Err(e) = persist::save_atomic(&store.path, &snapshot).await {
            warn!(path = %store.path.display(), "state persistence failed: {}", e);
        }

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
            break;
        }
    }
}
