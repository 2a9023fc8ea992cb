//! Registry of client identifiers that currently have a dispatched session.
//!
//! Keyed by [`ClientId`]. When two connections present the same identifier
//! the later one wins the entry; each entry also carries the [`SessionId`]
//! of the unit that owns it so a superseded session cannot evict its
//! replacement when it ends.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use vane_core::{ClientId, SessionId};

use crate::spawn::SpawnedTask;

/// One registry entry.
#[derive(Debug)]
pub struct ConnectedClient {
    /// Identifier the client presented.
    pub client_id: ClientId,
    /// Session unit that owns this entry.
    pub session_id: SessionId,
    /// When the entry was recorded.
    pub connected_at: Instant,
    task: Option<SpawnedTask>,
}

impl ConnectedClient {
    fn new(client_id: ClientId, session_id: SessionId) -> Self {
        Self {
            client_id,
            session_id,
            connected_at: Instant::now(),
            task: None,
        }
    }

    /// Handle to the scheduled unit, once attached.
    pub fn task(&self) -> Option<&SpawnedTask> {
        self.task.as_ref()
    }

    /// Consume the entry, yielding its task handle.
    pub fn into_task(self) -> Option<SpawnedTask> {
        self.task
    }
}

/// Concurrent map from client identifier to its current session.
///
/// Every operation takes the lock for its full duration, so a
/// [`snapshot`](Self::snapshot) never observes a half-applied change.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    clients: RwLock<HashMap<ClientId, ConnectedClient>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `client_id` as owned by `session_id`.
    ///
    /// Returns the entry it replaced, if the identifier was already present.
    pub fn record(&self, client_id: ClientId, session_id: SessionId) -> Option<ConnectedClient> {
        let entry = ConnectedClient::new(client_id.clone(), session_id);
        self.clients.write().insert(client_id, entry)
    }

    /// Attach the scheduled task to an entry still owned by `session_id`.
    ///
    /// Returns `false` (and drops `task`) if the entry is gone or was
    /// superseded.
    pub fn attach(&self, client_id: &ClientId, session_id: &SessionId, task: SpawnedTask) -> bool {
        let mut clients = self.clients.write();
        match clients.get_mut(client_id) {
            Some(entry) if entry.session_id == *session_id => {
                entry.task = Some(task);
                true
            }
            _ => false,
        }
    }

    /// Remove the entry for `client_id` only if `session_id` still owns it.
    pub fn release(&self, client_id: &ClientId, session_id: &SessionId) -> bool {
        let mut clients = self.clients.write();
        if clients
            .get(client_id)
            .is_some_and(|entry| entry.session_id == *session_id)
        {
            let _ = clients.remove(client_id);
            true
        } else {
            false
        }
    }

    /// Remove the entry for `client_id` regardless of owner.
    ///
    /// Absent identifiers are a no-op returning `false`.
    pub fn remove(&self, client_id: &ClientId) -> bool {
        self.clients.write().remove(client_id).is_some()
    }

    /// Identifiers currently present, sorted.
    pub fn snapshot(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `client_id` is present.
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.clients.read().contains_key(client_id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Remove every entry, returning how many there were.
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<ConnectedClient> {
        let mut clients = self.clients.write();
        clients.drain().map(|(_, entry)| entry).collect()
    }
}
