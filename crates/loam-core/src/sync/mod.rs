//! Synchronization between the local mirror and the remote store

mod http;
mod reconciler;
mod remote;
mod session;
#[cfg(test)]
mod testing;

pub use http::HttpRemote;
pub use reconciler::{
    DrainOutcome, FetchKind, Reconciler, SyncStatus, AGGRESSIVE_INTERVAL, AGGRESSIVE_WINDOW,
    FULL_SYNC_THRESHOLD, IDLE_INTERVAL, MIN_FETCH_INTERVAL,
};
pub use remote::{ConnectivitySource, RealtimeEvent, RemoteStore, SharedConnectivity};
pub use session::SyncSession;
