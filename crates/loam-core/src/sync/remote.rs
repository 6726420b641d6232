//! Remote store and environment collaborator interfaces

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::Result;
use crate::models::{Note, NoteId, OwnerId};

/// Trait for the remote CRUD collaborator (async).
///
/// The core is format-agnostic: any backend honoring these four operations
/// and the `Note` shape works.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Insert-or-update a note by id; returns the stored row as the server
    /// recorded it
    async fn upsert(&self, note: &Note) -> Result<Note>;

    /// Delete a note by id
    async fn delete_by_id(&self, owner: &OwnerId, id: &NoteId) -> Result<()>;

    /// Delta read: rows updated after the given timestamp. Cannot observe
    /// deletions.
    async fn list_since(&self, owner: &OwnerId, since: DateTime<Utc>) -> Result<Vec<Note>>;

    /// Full read of an owner's rows, used to reconcile deletions
    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>>;
}

/// Push event delivered over the remote's realtime channel.
///
/// The reconciler treats these purely as fetch/merge triggers.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    Inserted(Note),
    Updated(Note),
    Deleted { note_id: NoteId, owner_id: OwnerId },
}

impl RealtimeEvent {
    /// The owner partition the event belongs to
    #[must_use]
    pub fn owner_id(&self) -> &OwnerId {
        match self {
            Self::Inserted(note) | Self::Updated(note) => &note.owner_id,
            Self::Deleted { owner_id, .. } => owner_id,
        }
    }
}

/// Source of the online/offline signal.
///
/// Injected at construction so connectivity is an explicit input with a
/// subscribable lifecycle, not an ambient global listener.
pub trait ConnectivitySource {
    /// Current connectivity
    fn is_online(&self) -> bool;

    /// Subscribe to connectivity changes
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Watch-backed connectivity source shared between the reconciler and
/// whatever layer observes the platform's network state.
#[derive(Clone)]
pub struct SharedConnectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl SharedConnectivity {
    /// Create a source with the given initial state
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report a connectivity change
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl ConnectivitySource for SharedConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_connectivity_toggles() {
        let source = SharedConnectivity::new(true);
        assert!(source.is_online());

        source.set_online(false);
        assert!(!source.is_online());
    }

    #[test]
    fn test_subscribe_sees_changes() {
        let source = SharedConnectivity::new(false);
        let rx = source.subscribe();

        source.set_online(true);
        assert!(*rx.borrow());
    }

    #[test]
    fn test_event_owner_id() {
        let note = Note::new(OwnerId::new("alice"), "Title", "Body");
        let event = RealtimeEvent::Updated(note.clone());
        assert_eq!(event.owner_id(), &note.owner_id);

        let deleted = RealtimeEvent::Deleted {
            note_id: note.id,
            owner_id: OwnerId::new("bob"),
        };
        assert_eq!(deleted.owner_id().as_str(), "bob");
    }
}
