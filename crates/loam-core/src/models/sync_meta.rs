//! Per-owner synchronization metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Synchronization bookkeeping for one owner, mutated only by the
/// reconciler and persisted by the local store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Timestamp of the last successful remote read of any kind
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Timestamp of the last reconciling full fetch
    pub last_full_sync_at: Option<DateTime<Utc>>,
    /// True while at least one pending op awaits remote confirmation
    pub dirty: bool,
}

/// Unified sync state shown by client frontends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
}
