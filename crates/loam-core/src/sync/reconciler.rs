//! Synchronization reconciler
//!
//! Keeps the local mirror and the remote store eventually consistent while
//! always serving local data first. Mutations write locally before anything
//! touches the network; failed or offline remote calls become queued ops
//! that replay in order on the next trigger.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{Note, NoteId, OwnerId, PendingOp, SyncState};

use super::remote::{ConnectivitySource, RealtimeEvent, RemoteStore};

/// Cooldown between remote reads triggered by UI churn
pub const MIN_FETCH_INTERVAL: Duration = Duration::from_secs(60);
/// Maximum age of the last reconciling full fetch before one is forced
pub const FULL_SYNC_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);
/// How long the refetch burst lasts after a local mutation
pub const AGGRESSIVE_WINDOW: Duration = Duration::from_secs(30);
/// Poll interval inside the burst window
pub const AGGRESSIVE_INTERVAL: Duration = Duration::from_secs(3);
/// Poll interval when idle
pub const IDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Which kind of remote read a fetch performed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchKind {
    /// Rows updated since the last fetch; cannot observe deletions
    Delta,
    /// The owner's entire remote set; reconciles deletions
    Full,
}

/// Outcome of a drain pass over the pending-op queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Ops confirmed and removed from the queue
    pub synced: usize,
}

/// Pending/dirty indicator for status display
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncStatus {
    pub pending: usize,
    pub dirty: bool,
    pub state: SyncState,
}

/// Orchestrates queueing, draining, fetching, and merging for any number of
/// owners. Holds no persistent state of its own; everything durable lives in
/// the local store.
pub struct Reconciler<S, R, C> {
    store: S,
    remote: R,
    connectivity: C,
    in_flight: HashSet<OwnerId>,
    last_mutation: HashMap<OwnerId, Instant>,
}

impl<S, R, C> Reconciler<S, R, C>
where
    S: LocalStore,
    R: RemoteStore,
    C: ConnectivitySource,
{
    pub fn new(store: S, remote: R, connectivity: C) -> Self {
        Self {
            store,
            remote,
            connectivity,
            in_flight: HashSet::new(),
            last_mutation: HashMap::new(),
        }
    }

    /// The underlying local store
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The remote collaborator
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// The connectivity source
    pub const fn connectivity(&self) -> &C {
        &self.connectivity
    }

    /// Serve the owner's local state immediately, recording the owner for
    /// offline bootstrap. Never touches the network.
    pub fn hydrate(&mut self, owner: &OwnerId) -> Result<Vec<Note>> {
        self.store.set_last_known_owner(owner)?;
        self.store.list_by_owner(owner)
    }

    /// Create a note and write it through to the remote store
    pub async fn create_note(
        &mut self,
        owner: &OwnerId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Note> {
        let note = Note::new(owner.clone(), title, content);
        self.apply_upsert(note).await
    }

    /// Persist an edited note, refreshing its timestamp
    pub async fn update_note(&mut self, mut note: Note) -> Result<Note> {
        note.touch();
        self.apply_upsert(note).await
    }

    /// Flip the reserved pinned tag on a note
    pub async fn toggle_pin(&mut self, owner: &OwnerId, id: &NoteId) -> Result<Note> {
        let mut note = self
            .store
            .get(owner, id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        note.set_pinned(!note.is_pinned());
        note.touch();
        self.apply_upsert(note).await
    }

    /// Delete a note locally and on the remote store
    pub async fn delete_note(&mut self, owner: &OwnerId, id: &NoteId) -> Result<()> {
        self.store.delete(owner, id)?;
        self.mark_mutated(owner);

        if !self.connectivity.is_online() {
            return self.enqueue_delete(owner, id);
        }

        match self.remote.delete_by_id(owner, id).await {
            Ok(()) => {
                // The server-side delete is authoritative; a stale queued
                // upsert must not revive the note
                self.store.remove_ops_for_note(owner, id)
            }
            Err(error) => {
                tracing::warn!(%id, %error, "remote delete failed, queueing tombstone");
                self.enqueue_delete(owner, id)
            }
        }
    }

    /// Replay the owner's queued ops against the remote store, in enqueue
    /// order, stopping at the first failure. Returns the confirmed count.
    pub async fn sync_pending(&mut self, owner: &OwnerId) -> Result<DrainOutcome> {
        if !self.connectivity.is_online() {
            return Ok(DrainOutcome::default());
        }

        let ops = self.store.replayable_ops(owner)?;
        let mut synced = 0;
        for queued in ops {
            let outcome = match &queued.op {
                PendingOp::Upsert { note } => self.remote.upsert(note).await.map(|_| ()),
                PendingOp::Delete { note_id, owner_id } => {
                    self.remote.delete_by_id(owner_id, note_id).await
                }
            };

            match outcome {
                Ok(()) => {
                    // Remove exactly this entry; another op may reference
                    // the same note
                    self.store.remove_op(queued.queue_id)?;
                    synced += 1;
                }
                Err(error) => {
                    // Replay must stay ordered: leave this op and the tail
                    // queued for the next trigger
                    tracing::warn!(%owner, %error, "pending op replay failed, will retry");
                    break;
                }
            }
        }

        if self.store.pending_count(owner)? == 0 {
            let mut meta = self.store.sync_meta(owner)?;
            if meta.dirty {
                meta.dirty = false;
                self.store.set_sync_meta(owner, &meta)?;
            }
        }

        if synced > 0 {
            tracing::info!(%owner, synced, "drained pending ops");
        }
        Ok(DrainOutcome { synced })
    }

    /// Pull remote state and merge it into the local mirror.
    ///
    /// Skips silently when offline or when a fetch for this owner is
    /// already running (redundancy control; merges are idempotent, so the
    /// guard is not needed for correctness). Returns the fetch kind
    /// performed, if any.
    pub async fn fetch_remote_and_merge(
        &mut self,
        owner: &OwnerId,
        force_full: bool,
    ) -> Result<Option<FetchKind>> {
        if !self.connectivity.is_online() {
            return Ok(None);
        }
        if !self.in_flight.insert(owner.clone()) {
            tracing::debug!(%owner, "fetch already in flight, skipping");
            return Ok(None);
        }

        let result = self.fetch_and_merge_inner(owner, force_full).await;
        self.in_flight.remove(owner);
        result.map(Some)
    }

    async fn fetch_and_merge_inner(
        &mut self,
        owner: &OwnerId,
        force_full: bool,
    ) -> Result<FetchKind> {
        let meta = self.store.sync_meta(owner)?;
        let kind = if force_full
            || meta.last_fetched_at.is_none()
            || age_exceeds(meta.last_full_sync_at, Utc::now(), FULL_SYNC_THRESHOLD)
        {
            FetchKind::Full
        } else {
            FetchKind::Delta
        };

        let rows = match kind {
            FetchKind::Full => self.remote.list_all(owner).await?,
            FetchKind::Delta => {
                let since = meta.last_fetched_at.unwrap_or(DateTime::UNIX_EPOCH);
                self.remote.list_since(owner, since).await?
            }
        };

        tracing::debug!(%owner, ?kind, rows = rows.len(), "merging remote rows");
        self.merge_rows(owner, &rows)?;
        if kind == FetchKind::Full {
            self.sweep_missing(owner, &rows)?;
        }

        let mut meta = self.store.sync_meta(owner)?;
        meta.last_fetched_at = Some(Utc::now());
        if kind == FetchKind::Full {
            meta.last_full_sync_at = meta.last_fetched_at;
        }
        self.store.set_sync_meta(owner, &meta)?;

        Ok(kind)
    }

    /// Drain, fetch when warranted, and return the owner's refreshed list.
    ///
    /// Remote failures are absorbed into retry-later; the caller always
    /// gets current local state.
    pub async fn reconcile(&mut self, owner: &OwnerId) -> Result<Vec<Note>> {
        let drained = self.sync_pending(owner).await?;

        if self.connectivity.is_online() {
            let meta = self.store.sync_meta(owner)?;
            let should_fetch = drained.synced > 0
                || self.store.note_count(owner)? == 0
                || age_exceeds(meta.last_fetched_at, Utc::now(), MIN_FETCH_INTERVAL);

            if should_fetch {
                if let Err(error) = self.fetch_remote_and_merge(owner, false).await {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    tracing::warn!(%owner, %error, "remote fetch failed, serving local data");
                }
            }
        }

        self.store.list_by_owner(owner)
    }

    /// React to a realtime push from the remote store
    pub async fn handle_remote_event(&mut self, event: &RealtimeEvent) -> Result<()> {
        match event {
            RealtimeEvent::Inserted(note) | RealtimeEvent::Updated(note) => {
                tracing::debug!(id = %note.id, "merging pushed note");
                self.merge_rows(&note.owner_id, std::slice::from_ref(note))
            }
            RealtimeEvent::Deleted { note_id, owner_id } => {
                // The push may race a queued local delete; refetch instead
                // of trusting the payload
                tracing::debug!(%note_id, "remote delete pushed, running full refetch");
                match self.fetch_remote_and_merge(owner_id, true).await {
                    Ok(_) => Ok(()),
                    Err(error) if error.is_retryable() => {
                        tracing::warn!(%owner_id, %error, "refetch after remote delete failed");
                        Ok(())
                    }
                    Err(error) => Err(error),
                }
            }
        }
    }

    /// Pending/dirty indicator for status display
    pub fn status(&self, owner: &OwnerId) -> Result<SyncStatus> {
        let pending = self.store.pending_count(owner)?;
        let dirty = self.store.sync_meta(owner)?.dirty;
        let state = if self.connectivity.is_online() {
            if pending > 0 {
                SyncState::Syncing
            } else {
                SyncState::Synced
            }
        } else {
            SyncState::Offline
        };
        Ok(SyncStatus {
            pending,
            dirty,
            state,
        })
    }

    /// How long until the next background refetch: short while a recent
    /// local mutation is converging across devices, long when idle.
    pub fn refetch_interval(&self, owner: &OwnerId) -> Duration {
        let bursting = self
            .last_mutation
            .get(owner)
            .is_some_and(|at| at.elapsed() < AGGRESSIVE_WINDOW);
        if bursting {
            AGGRESSIVE_INTERVAL
        } else {
            IDLE_INTERVAL
        }
    }

    async fn apply_upsert(&mut self, note: Note) -> Result<Note> {
        // Local write first: the UI must see the note immediately and the
        // mutation must survive whatever the network does next
        self.store.put(&note)?;
        self.mark_mutated(&note.owner_id);

        if !self.connectivity.is_online() {
            self.store.enqueue(&PendingOp::Upsert { note: note.clone() })?;
            return Ok(note);
        }

        // A queued op for this note must replay before any direct call, or
        // the remote store would observe the mutations out of order
        let has_queued = self
            .store
            .replayable_ops(&note.owner_id)?
            .iter()
            .any(|queued| queued.op.note_id() == &note.id);
        if has_queued {
            self.store.enqueue(&PendingOp::Upsert { note: note.clone() })?;
            return Ok(note);
        }

        match self.remote.upsert(&note).await {
            Ok(stored) => {
                self.store.put(&stored)?;
                Ok(stored)
            }
            Err(error) => {
                tracing::warn!(id = %note.id, %error, "remote upsert failed, queueing");
                self.store.enqueue(&PendingOp::Upsert { note: note.clone() })?;
                Ok(note)
            }
        }
    }

    /// Merge remote rows into the local mirror.
    ///
    /// Remote rows overwrite local state for the same id unconditionally —
    /// the remote store is the reconciliation authority once the owner's own
    /// pending writes are flushed — with a single exception: a note with a
    /// queued local delete masks the incoming row until the delete is
    /// confirmed, so an explicit user delete is never resurrected.
    fn merge_rows(&self, owner: &OwnerId, rows: &[Note]) -> Result<()> {
        let pending_deletes = self.store.pending_deletes(owner)?;
        let accepted: Vec<Note> = rows
            .iter()
            .filter(|note| !pending_deletes.contains(&note.id))
            .cloned()
            .collect();

        if accepted.len() < rows.len() {
            tracing::debug!(
                %owner,
                masked = rows.len() - accepted.len(),
                "masked incoming rows with queued deletes"
            );
        }
        self.store.put_many(&accepted)
    }

    /// Full merges only: drop local rows the remote set no longer contains.
    ///
    /// Rows with any queued op are spared — an unreplayed local creation or
    /// edit must not be swept away — as is the optimistic placeholder row,
    /// which the remote store has never seen.
    fn sweep_missing(&self, owner: &OwnerId, remote_rows: &[Note]) -> Result<()> {
        let remote_ids: HashSet<&NoteId> = remote_rows.iter().map(|note| &note.id).collect();
        let queued_ids: HashSet<NoteId> = self
            .store
            .replayable_ops(owner)?
            .iter()
            .map(|queued| queued.op.note_id().clone())
            .collect();

        for id in self.store.note_ids(owner)? {
            if remote_ids.contains(&id) || queued_ids.contains(&id) || id.is_placeholder() {
                continue;
            }
            tracing::debug!(%owner, %id, "removing note deleted on remote");
            self.store.delete(owner, &id)?;
        }
        Ok(())
    }

    fn enqueue_delete(&self, owner: &OwnerId, id: &NoteId) -> Result<()> {
        self.store.enqueue(&PendingOp::Delete {
            note_id: id.clone(),
            owner_id: owner.clone(),
        })
    }

    fn mark_mutated(&mut self, owner: &OwnerId) {
        self.last_mutation.insert(owner.clone(), Instant::now());
    }
}

fn age_exceeds(ts: Option<DateTime<Utc>>, now: DateTime<Utc>, limit: Duration) -> bool {
    ts.is_none_or(|ts| {
        now.signed_duration_since(ts)
            .to_std()
            .is_ok_and(|age| age > limit)
    })
}
