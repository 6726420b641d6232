//! Pending mutation queue models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::note::{Note, NoteId, OwnerId};

/// A queued mutation not yet confirmed by the remote store.
///
/// Created when a mutation happens while offline or when a direct remote
/// call fails; removed only after the remote store confirms the replayed
/// call succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingOp {
    /// Insert-or-update a note on the remote store
    Upsert { note: Note },
    /// Delete a note on the remote store; doubles as the tombstone that
    /// masks the note during merges until the delete is confirmed
    Delete { note_id: NoteId, owner_id: OwnerId },
}

impl PendingOp {
    /// The note this op refers to
    #[must_use]
    pub fn note_id(&self) -> &NoteId {
        match self {
            Self::Upsert { note } => &note.id,
            Self::Delete { note_id, .. } => note_id,
        }
    }

    /// The owner partition this op belongs to
    #[must_use]
    pub fn owner_id(&self) -> &OwnerId {
        match self {
            Self::Upsert { note } => &note.owner_id,
            Self::Delete { owner_id, .. } => owner_id,
        }
    }

    /// Whether this op is a delete tombstone
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }
}

/// A pending op as stored in the queue, paired with its removal handle.
///
/// `queue_id` identifies this exact entry, not the logical note: two ops may
/// reference the same note id, and replay must remove only the entry it
/// confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOp {
    /// Removal handle for exactly this queue entry
    pub queue_id: i64,
    /// Enqueue timestamp, the replay ordering key
    pub enqueued_at: DateTime<Utc>,
    /// The queued mutation
    pub op: PendingOp,
}
