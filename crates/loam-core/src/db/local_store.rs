//! Local note mirror and pending-op queue

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{Note, NoteId, OwnerId, PendingOp, QueuedOp, SyncMeta};

const LAST_KNOWN_OWNER_KEY: &str = "last_known_owner";

/// Trait for the durable local mirror: notes, the pending-op queue, and
/// per-owner sync metadata.
pub trait LocalStore {
    /// Insert-or-replace a note by (owner, id)
    fn put(&self, note: &Note) -> Result<()>;

    /// Bulk put, atomic as a set
    fn put_many(&self, notes: &[Note]) -> Result<()>;

    /// Get a note by (owner, id)
    fn get(&self, owner: &OwnerId, id: &NoteId) -> Result<Option<Note>>;

    /// Idempotent remove; no error if absent
    fn delete(&self, owner: &OwnerId, id: &NoteId) -> Result<()>;

    /// All displayable notes for an owner: blank drafts dropped, pinned
    /// notes first, then `updated_at` descending, id ascending on ties
    fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Note>>;

    /// Number of stored notes for an owner (blank drafts included)
    fn note_count(&self, owner: &OwnerId) -> Result<usize>;

    /// Every stored note id for an owner, blank drafts included; deletion
    /// sweeps must see rows the display list hides
    fn note_ids(&self, owner: &OwnerId) -> Result<Vec<NoteId>>;

    /// Append a pending op and mark the owner dirty, atomically.
    ///
    /// Enqueueing a Delete purges any queued Upsert for the same note
    /// first, so replay never resurrects a note the user deleted.
    fn enqueue(&self, op: &PendingOp) -> Result<()>;

    /// The owner's queue ordered by enqueue time, each entry carrying its
    /// own removal handle
    fn replayable_ops(&self, owner: &OwnerId) -> Result<Vec<QueuedOp>>;

    /// Remove exactly one queue entry by its handle
    fn remove_op(&self, queue_id: i64) -> Result<()>;

    /// Purge every queued op referencing a note, after an authoritative
    /// server-side delete
    fn remove_ops_for_note(&self, owner: &OwnerId, id: &NoteId) -> Result<()>;

    /// Note ids with an in-flight queued delete
    fn pending_deletes(&self, owner: &OwnerId) -> Result<HashSet<NoteId>>;

    /// Number of queued ops for an owner
    fn pending_count(&self, owner: &OwnerId) -> Result<usize>;

    /// Per-owner sync metadata; defaults when never synced
    fn sync_meta(&self, owner: &OwnerId) -> Result<SyncMeta>;

    /// Replace the owner's sync metadata
    fn set_sync_meta(&self, owner: &OwnerId, meta: &SyncMeta) -> Result<()>;

    /// Owner recorded by the last session, for offline bootstrap
    fn last_known_owner(&self) -> Result<Option<OwnerId>>;

    /// Record the active owner
    fn set_last_known_owner(&self, owner: &OwnerId) -> Result<()>;

    /// Remove all notes, queued ops, and metadata for an owner
    fn clear_all_for_owner(&self, owner: &OwnerId) -> Result<()>;
}

/// `SQLite` implementation of `LocalStore`
pub struct SqliteLocalStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteLocalStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn put_with_conn(conn: &Connection, note: &Note) -> Result<()> {
        let tags = serde_json::to_string(&note.tags)?;
        conn.execute(
            "INSERT OR REPLACE INTO notes (owner_id, id, title, content, updated_at, tags, pinned)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                note.owner_id.as_str(),
                note.id.as_str(),
                note.title,
                note.content,
                note.updated_at.timestamp_millis(),
                tags,
                i32::from(note.is_pinned())
            ],
        )?;
        Ok(())
    }

    /// Parse a note from a database row
    fn parse_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
        let tags: String = row.get(5)?;
        Ok(Note {
            owner_id: OwnerId::new(row.get::<_, String>(0)?),
            id: NoteId::new(row.get::<_, String>(1)?),
            title: row.get(2)?,
            content: row.get(3)?,
            updated_at: from_millis(row.get(4)?),
            tags: serde_json::from_str(&tags).unwrap_or_default(),
        })
    }

    fn parse_queued_op(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }
}

impl LocalStore for SqliteLocalStore<'_> {
    fn put(&self, note: &Note) -> Result<()> {
        Self::put_with_conn(self.conn, note)
    }

    fn put_many(&self, notes: &[Note]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for note in notes {
            Self::put_with_conn(&tx, note)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, owner: &OwnerId, id: &NoteId) -> Result<Option<Note>> {
        let note = self
            .conn
            .query_row(
                "SELECT owner_id, id, title, content, updated_at, tags
                 FROM notes WHERE owner_id = ? AND id = ?",
                params![owner.as_str(), id.as_str()],
                Self::parse_note,
            )
            .optional()?;
        Ok(note)
    }

    fn delete(&self, owner: &OwnerId, id: &NoteId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM notes WHERE owner_id = ? AND id = ?",
            params![owner.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(
            "SELECT owner_id, id, title, content, updated_at, tags
             FROM notes
             WHERE owner_id = ?
             ORDER BY pinned DESC, updated_at DESC, id ASC",
        )?;

        let notes = stmt
            .query_map(params![owner.as_str()], Self::parse_note)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(notes
            .into_iter()
            .filter(Note::has_material_content)
            .collect())
    }

    fn note_count(&self, owner: &OwnerId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE owner_id = ?",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn note_ids(&self, owner: &OwnerId) -> Result<Vec<NoteId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM notes WHERE owner_id = ?")?;

        let ids = stmt
            .query_map(params![owner.as_str()], |row| {
                Ok(NoteId::new(row.get::<_, String>(0)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ids)
    }

    fn enqueue(&self, op: &PendingOp) -> Result<()> {
        let payload = serde_json::to_string(op)?;
        let kind = if op.is_delete() { "delete" } else { "upsert" };

        let tx = self.conn.unchecked_transaction()?;

        if op.is_delete() {
            // Coalesce: a delete supersedes any queued upsert for the note
            tx.execute(
                "DELETE FROM pending_ops
                 WHERE owner_id = ? AND note_id = ? AND kind = 'upsert'",
                params![op.owner_id().as_str(), op.note_id().as_str()],
            )?;
        }

        tx.execute(
            "INSERT INTO pending_ops (owner_id, note_id, kind, payload, enqueued_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                op.owner_id().as_str(),
                op.note_id().as_str(),
                kind,
                payload,
                Utc::now().timestamp_millis()
            ],
        )?;

        tx.execute(
            "INSERT INTO sync_meta (owner_id, dirty) VALUES (?, 1)
             ON CONFLICT(owner_id) DO UPDATE SET dirty = 1",
            params![op.owner_id().as_str()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn replayable_ops(&self, owner: &OwnerId) -> Result<Vec<QueuedOp>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, enqueued_at, payload
             FROM pending_ops
             WHERE owner_id = ?
             ORDER BY enqueued_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(params![owner.as_str()], Self::parse_queued_op)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut ops = Vec::with_capacity(rows.len());
        for (queue_id, enqueued_at, payload) in rows {
            ops.push(QueuedOp {
                queue_id,
                enqueued_at: from_millis(enqueued_at),
                op: serde_json::from_str(&payload)?,
            });
        }
        Ok(ops)
    }

    fn remove_op(&self, queue_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM pending_ops WHERE id = ?", params![queue_id])?;
        Ok(())
    }

    fn remove_ops_for_note(&self, owner: &OwnerId, id: &NoteId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM pending_ops WHERE owner_id = ? AND note_id = ?",
            params![owner.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn pending_deletes(&self, owner: &OwnerId) -> Result<HashSet<NoteId>> {
        let mut stmt = self.conn.prepare(
            "SELECT note_id FROM pending_ops WHERE owner_id = ? AND kind = 'delete'",
        )?;

        let ids = stmt
            .query_map(params![owner.as_str()], |row| {
                Ok(NoteId::new(row.get::<_, String>(0)?))
            })?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        Ok(ids)
    }

    fn pending_count(&self, owner: &OwnerId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pending_ops WHERE owner_id = ?",
            params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn sync_meta(&self, owner: &OwnerId) -> Result<SyncMeta> {
        let meta = self
            .conn
            .query_row(
                "SELECT last_fetched_at, last_full_sync_at, dirty
                 FROM sync_meta WHERE owner_id = ?",
                params![owner.as_str()],
                |row| {
                    Ok(SyncMeta {
                        last_fetched_at: row.get::<_, Option<i64>>(0)?.map(from_millis),
                        last_full_sync_at: row.get::<_, Option<i64>>(1)?.map(from_millis),
                        dirty: row.get::<_, i32>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(meta.unwrap_or_default())
    }

    fn set_sync_meta(&self, owner: &OwnerId, meta: &SyncMeta) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (owner_id, last_fetched_at, last_full_sync_at, dirty)
             VALUES (?, ?, ?, ?)",
            params![
                owner.as_str(),
                meta.last_fetched_at.map(|ts| ts.timestamp_millis()),
                meta.last_full_sync_at.map(|ts| ts.timestamp_millis()),
                i32::from(meta.dirty)
            ],
        )?;
        Ok(())
    }

    fn last_known_owner(&self) -> Result<Option<OwnerId>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![LAST_KNOWN_OWNER_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.map(OwnerId::new))
    }

    fn set_last_known_owner(&self, owner: &OwnerId) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![LAST_KNOWN_OWNER_KEY, owner.as_str()],
        )?;
        Ok(())
    }

    fn clear_all_for_owner(&self, owner: &OwnerId) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM notes WHERE owner_id = ?",
            params![owner.as_str()],
        )?;
        tx.execute(
            "DELETE FROM pending_ops WHERE owner_id = ?",
            params![owner.as_str()],
        )?;
        tx.execute(
            "DELETE FROM sync_meta WHERE owner_id = ?",
            params![owner.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("alice")
    }

    fn note_at(id: &str, title: &str, secs: i64) -> Note {
        Note {
            id: NoteId::new(id),
            owner_id: owner(),
            title: title.to_string(),
            content: format!("<p>{title}</p>"),
            updated_at: Utc.timestamp_opt(secs, 0).unwrap(),
            tags: std::collections::BTreeSet::new(),
        }
    }

    #[test]
    fn test_put_get_roundtrip() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let mut note = note_at("n1", "Hello", 1_000);
        note.set_pinned(true);
        store.put(&note).unwrap();

        let fetched = store.get(&owner(), &note.id).unwrap().unwrap();
        assert_eq!(fetched, note);
    }

    #[test]
    fn test_put_replaces_by_id() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let mut note = note_at("n1", "First", 1_000);
        store.put(&note).unwrap();

        note.title = "Second".to_string();
        store.put(&note).unwrap();

        let notes = store.list_by_owner(&owner()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Second");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let note = note_at("n1", "Hello", 1_000);
        store.put(&note).unwrap();
        store.delete(&owner(), &note.id).unwrap();
        store.delete(&owner(), &note.id).unwrap();

        assert!(store.get(&owner(), &note.id).unwrap().is_none());
    }

    #[test]
    fn test_list_ordering_pinned_then_updated() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let old = note_at("n-old", "Old", 1_000);
        let new = note_at("n-new", "New", 3_000);
        let mut pinned = note_at("n-pin", "Pinned", 2_000);
        pinned.set_pinned(true);

        store
            .put_many(&[old.clone(), new.clone(), pinned.clone()])
            .unwrap();

        let notes = store.list_by_owner(&owner()).unwrap();
        let ids: Vec<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n-pin", "n-new", "n-old"]);
    }

    #[test]
    fn test_list_tie_break_by_id() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        store
            .put_many(&[note_at("b", "B", 1_000), note_at("a", "A", 1_000)])
            .unwrap();

        let notes = store.list_by_owner(&owner()).unwrap();
        let ids: Vec<&str> = notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_list_filters_blank_notes() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let mut blank = note_at("n-blank", "", 2_000);
        blank.content = "<p>&nbsp;</p>".to_string();
        store
            .put_many(&[blank, note_at("n-real", "Real", 1_000)])
            .unwrap();

        let notes = store.list_by_owner(&owner()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id.as_str(), "n-real");

        // Still present in underlying storage
        assert_eq!(store.note_count(&owner()).unwrap(), 2);
    }

    #[test]
    fn test_list_is_partitioned_by_owner() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        store.put(&note_at("n1", "Mine", 1_000)).unwrap();
        let mut other = note_at("n2", "Theirs", 1_000);
        other.owner_id = OwnerId::new("bob");
        store.put(&other).unwrap();

        assert_eq!(store.list_by_owner(&owner()).unwrap().len(), 1);
        assert_eq!(store.list_by_owner(&OwnerId::new("bob")).unwrap().len(), 1);
    }

    #[test]
    fn test_enqueue_marks_dirty() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        assert!(!store.sync_meta(&owner()).unwrap().dirty);

        let note = note_at("n1", "Hello", 1_000);
        store.enqueue(&PendingOp::Upsert { note }).unwrap();

        assert!(store.sync_meta(&owner()).unwrap().dirty);
        assert_eq!(store.pending_count(&owner()).unwrap(), 1);
    }

    #[test]
    fn test_replayable_ops_ordered_with_handles() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let first = note_at("n1", "First", 1_000);
        let second = note_at("n1", "Second", 2_000);
        store
            .enqueue(&PendingOp::Upsert {
                note: first.clone(),
            })
            .unwrap();
        store
            .enqueue(&PendingOp::Upsert {
                note: second.clone(),
            })
            .unwrap();

        let ops = store.replayable_ops(&owner()).unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].queue_id < ops[1].queue_id);
        assert!(ops[0].enqueued_at <= ops[1].enqueued_at);

        // Removing by handle removes exactly that entry, not the note's ops
        store.remove_op(ops[0].queue_id).unwrap();
        let remaining = store.replayable_ops(&owner()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].queue_id, ops[1].queue_id);
        match &remaining[0].op {
            PendingOp::Upsert { note } => assert_eq!(note.title, "Second"),
            other => panic!("expected upsert, got {other:?}"),
        }
    }

    #[test]
    fn test_delete_coalesces_queued_upserts() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let note = note_at("n1", "Edited offline", 1_000);
        store
            .enqueue(&PendingOp::Upsert { note: note.clone() })
            .unwrap();
        store
            .enqueue(&PendingOp::Delete {
                note_id: note.id.clone(),
                owner_id: owner(),
            })
            .unwrap();

        let ops = store.replayable_ops(&owner()).unwrap();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].op.is_delete());
    }

    #[test]
    fn test_remove_ops_for_note() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let kept = note_at("n-kept", "Kept", 1_000);
        let purged = note_at("n-purged", "Purged", 1_000);
        store
            .enqueue(&PendingOp::Upsert { note: kept.clone() })
            .unwrap();
        store
            .enqueue(&PendingOp::Upsert {
                note: purged.clone(),
            })
            .unwrap();

        store.remove_ops_for_note(&owner(), &purged.id).unwrap();

        let ops = store.replayable_ops(&owner()).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op.note_id(), &kept.id);
    }

    #[test]
    fn test_pending_deletes() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        store
            .enqueue(&PendingOp::Upsert {
                note: note_at("n1", "Up", 1_000),
            })
            .unwrap();
        store
            .enqueue(&PendingOp::Delete {
                note_id: NoteId::new("n2"),
                owner_id: owner(),
            })
            .unwrap();

        let deletes = store.pending_deletes(&owner()).unwrap();
        assert_eq!(deletes.len(), 1);
        assert!(deletes.contains(&NoteId::new("n2")));
    }

    #[test]
    fn test_sync_meta_roundtrip() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        let meta = SyncMeta {
            last_fetched_at: Some(Utc.timestamp_opt(10, 0).unwrap()),
            last_full_sync_at: Some(Utc.timestamp_opt(5, 0).unwrap()),
            dirty: true,
        };
        store.set_sync_meta(&owner(), &meta).unwrap();

        assert_eq!(store.sync_meta(&owner()).unwrap(), meta);
    }

    #[test]
    fn test_last_known_owner() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        assert!(store.last_known_owner().unwrap().is_none());

        store.set_last_known_owner(&owner()).unwrap();
        assert_eq!(store.last_known_owner().unwrap(), Some(owner()));
    }

    #[test]
    fn test_clear_all_for_owner() {
        let db = setup();
        let store = SqliteLocalStore::new(db.connection());

        store.put(&note_at("n1", "Mine", 1_000)).unwrap();
        store
            .enqueue(&PendingOp::Upsert {
                note: note_at("n2", "Queued", 1_000),
            })
            .unwrap();

        let mut other = note_at("n3", "Theirs", 1_000);
        other.owner_id = OwnerId::new("bob");
        store.put(&other).unwrap();

        store.clear_all_for_owner(&owner()).unwrap();

        assert_eq!(store.note_count(&owner()).unwrap(), 0);
        assert_eq!(store.pending_count(&owner()).unwrap(), 0);
        assert!(!store.sync_meta(&owner()).unwrap().dirty);
        assert_eq!(store.note_count(&OwnerId::new("bob")).unwrap(), 1);
    }
}
