//! Database migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Local mirror of remote note state, partitioned by owner
        CREATE TABLE IF NOT EXISTS notes (
            owner_id TEXT NOT NULL,
            id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            pinned INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (owner_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_notes_owner_order
            ON notes(owner_id, pinned DESC, updated_at DESC);

        -- Mutations awaiting remote confirmation, replayed in enqueue order
        CREATE TABLE IF NOT EXISTS pending_ops (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id TEXT NOT NULL,
            note_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            enqueued_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_ops_owner
            ON pending_ops(owner_id, enqueued_at);
        CREATE INDEX IF NOT EXISTS idx_pending_ops_note
            ON pending_ops(owner_id, note_id);

        -- Per-owner sync bookkeeping
        CREATE TABLE IF NOT EXISTS sync_meta (
            owner_id TEXT PRIMARY KEY,
            last_fetched_at INTEGER,
            last_full_sync_at INTEGER,
            dirty INTEGER NOT NULL DEFAULT 0
        );

        -- Small local-only key-value table
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);",
    )?;

    tx.commit()?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
