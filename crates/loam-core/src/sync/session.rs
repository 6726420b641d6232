//! Background sync session for one owner.
//!
//! A single cooperative task wires the reconciler to its environment:
//! connectivity transitions, realtime pushes, and a periodic tick. The
//! sources are injected channels with an explicit lifecycle, never ambient
//! global listeners; the session ends when the event channel closes.

use tokio::sync::mpsc;

use crate::db::LocalStore;
use crate::error::Result;
use crate::models::OwnerId;

use super::reconciler::Reconciler;
use super::remote::{ConnectivitySource, RealtimeEvent, RemoteStore};

/// Event-loop driver around a [`Reconciler`] for one owner session.
pub struct SyncSession<'r, S, R, C> {
    reconciler: &'r mut Reconciler<S, R, C>,
    owner: OwnerId,
    events: mpsc::Receiver<RealtimeEvent>,
}

impl<'r, S, R, C> SyncSession<'r, S, R, C>
where
    S: LocalStore,
    R: RemoteStore,
    C: ConnectivitySource,
{
    pub fn new(
        reconciler: &'r mut Reconciler<S, R, C>,
        owner: OwnerId,
        events: mpsc::Receiver<RealtimeEvent>,
    ) -> Self {
        Self {
            reconciler,
            owner,
            events,
        }
    }

    /// Run until the realtime channel closes.
    ///
    /// Because every trigger is awaited to completion before the next one is
    /// taken, drains and merges for the owner are naturally serialized.
    /// Local storage failures end the session; remote failures are absorbed
    /// by the reconciler and retried on the next trigger.
    pub async fn run(mut self) -> Result<()> {
        let mut online_rx = self.reconciler.connectivity().subscribe();

        // Serve local state immediately, then converge in the background
        self.reconciler.hydrate(&self.owner)?;

        loop {
            let tick = self.reconciler.refetch_interval(&self.owner);

            tokio::select! {
                biased;

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        tracing::debug!(owner = %self.owner, "connectivity source closed, stopping session");
                        break;
                    }
                    if *online_rx.borrow_and_update() {
                        tracing::info!(owner = %self.owner, "connectivity restored, reconciling");
                        self.reconciler.reconcile(&self.owner).await?;
                    } else {
                        tracing::info!(owner = %self.owner, "connectivity lost, queueing mutations");
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => self.reconciler.handle_remote_event(&event).await?,
                        None => {
                            tracing::debug!(owner = %self.owner, "realtime channel closed, stopping session");
                            break;
                        }
                    }
                }

                () = tokio::time::sleep(tick) => {
                    self.reconciler.reconcile(&self.owner).await?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteLocalStore};
    use crate::models::{Note, OwnerId};
    use crate::sync::remote::SharedConnectivity;
    use crate::sync::testing::MockRemote;

    fn owner() -> OwnerId {
        OwnerId::new("alice")
    }

    #[tokio::test]
    async fn run_stops_when_event_channel_closes() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteLocalStore::new(db.connection());
        let mut recon = Reconciler::new(store, MockRemote::new(), SharedConnectivity::new(false));

        let (tx, rx) = mpsc::channel(4);
        drop(tx);

        SyncSession::new(&mut recon, owner(), rx).run().await.unwrap();
    }

    #[tokio::test]
    async fn realtime_insert_lands_in_store() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteLocalStore::new(db.connection());
        let mut recon = Reconciler::new(store, MockRemote::new(), SharedConnectivity::new(true));

        let note = Note::new(owner(), "Pushed", "Body");
        let (tx, rx) = mpsc::channel(4);
        tx.send(RealtimeEvent::Inserted(note.clone())).await.unwrap();
        drop(tx);

        SyncSession::new(&mut recon, owner(), rx).run().await.unwrap();

        assert!(recon.store().get(&owner(), &note.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn connectivity_restore_drains_queue() {
        let db = Database::open_in_memory().unwrap();
        let store = SqliteLocalStore::new(db.connection());
        let connectivity = SharedConnectivity::new(false);
        let mut recon = Reconciler::new(store, MockRemote::new(), connectivity.clone());

        recon.create_note(&owner(), "Queued", "Body").await.unwrap();
        assert_eq!(recon.store().pending_count(&owner()).unwrap(), 1);

        let (tx, rx) = mpsc::channel(4);
        let session = SyncSession::new(&mut recon, owner(), rx);

        let flip = async move {
            connectivity.set_online(true);
            drop(tx);
        };
        let (ran, ()) = tokio::join!(session.run(), flip);
        ran.unwrap();

        assert_eq!(recon.store().pending_count(&owner()).unwrap(), 0);
        assert_eq!(recon.remote().notes_for(&owner()).len(), 1);
    }
}
