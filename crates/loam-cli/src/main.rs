//! Loam CLI - offline-first notes from the command line
//!
//! Quick capture with minimal friction; every mutation lands locally first
//! and syncs to the configured remote when one is reachable.

use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use loam_core::db::{Database, LocalStore, SqliteLocalStore};
use loam_core::models::{Note, NoteId, OwnerId, SyncState};
use loam_core::sync::{
    HttpRemote, RealtimeEvent, Reconciler, RemoteStore, SharedConnectivity, SyncSession,
};
use loam_core::Error;
use serde::Serialize;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "loam")]
#[command(about = "Offline-first notes from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Owner id for all operations (defaults to LOAM_OWNER, then the owner
    /// recorded by the last session)
    #[arg(long)]
    owner: Option<String>,

    /// Work against the local mirror only, queueing every mutation
    #[arg(long)]
    offline: bool,

    /// Quick capture: loam "my thought here"
    #[arg(trailing_var_arg = true)]
    note: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Optional title line
        #[arg(long)]
        title: Option<String>,
        /// Note content
        content: Vec<String>,
    },
    /// List notes, pinned first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replacement title
        #[arg(long)]
        title: Option<String>,
        /// Replacement content
        content: Vec<String>,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Pin a note to the top of the list
    Pin {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Unpin a note
    Unpin {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Drain queued mutations and pull remote changes
    Sync,
    /// Show pending-op and sync status
    Status,
    /// Keep syncing in the background until interrupted
    Watch,
    /// Remove all local notes and queued ops for the owner
    Purge {
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] loam_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Note ID cannot be empty")]
    EmptyNoteId,
    #[error("No owner configured. Pass --owner or set LOAM_OWNER.")]
    MissingOwner,
    #[error("Note not found for id/prefix: {0}")]
    NoteNotFound(String),
    #[error("{0}")]
    AmbiguousNoteId(String),
    #[error(
        "Sync is not configured. Set LOAM_REMOTE_URL (and optionally LOAM_REMOTE_TOKEN) to enable `loam sync`."
    )]
    SyncNotConfigured,
    #[error("Refusing to purge without --yes")]
    PurgeNotConfirmed,
}

/// Remote collaborator for the CLI: HTTP when configured, otherwise every
/// call reports the remote as unavailable and mutations queue locally.
enum CliRemote {
    Http(HttpRemote),
    Disabled,
}

impl RemoteStore for CliRemote {
    async fn upsert(&self, note: &Note) -> loam_core::Result<Note> {
        match self {
            Self::Http(remote) => remote.upsert(note).await,
            Self::Disabled => Err(disabled()),
        }
    }

    async fn delete_by_id(&self, owner: &OwnerId, id: &NoteId) -> loam_core::Result<()> {
        match self {
            Self::Http(remote) => remote.delete_by_id(owner, id).await,
            Self::Disabled => Err(disabled()),
        }
    }

    async fn list_since(
        &self,
        owner: &OwnerId,
        since: chrono::DateTime<Utc>,
    ) -> loam_core::Result<Vec<Note>> {
        match self {
            Self::Http(remote) => remote.list_since(owner, since).await,
            Self::Disabled => Err(disabled()),
        }
    }

    async fn list_all(&self, owner: &OwnerId) -> loam_core::Result<Vec<Note>> {
        match self {
            Self::Http(remote) => remote.list_all(owner).await,
            Self::Disabled => Err(disabled()),
        }
    }
}

fn disabled() -> Error {
    Error::RemoteUnavailable("sync not configured".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteConfig {
    url: String,
    token: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loam=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    if cli.command.is_none() && cli.note.is_empty() {
        Cli::command().print_help().map_err(CliError::Io)?;
        println!();
        return Ok(());
    }

    let db_path = resolve_db_path(cli.db_path.clone());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path)?;

    let owner = resolve_owner(cli.owner.clone(), &SqliteLocalStore::new(db.connection()))?;
    let remote_config = remote_config_from_env();
    let online = remote_config.is_some() && !cli.offline;

    let remote = match &remote_config {
        Some(config) => {
            tracing::info!(url = %config.url, "remote sync enabled");
            CliRemote::Http(HttpRemote::new(&config.url, config.token.clone())?)
        }
        None => CliRemote::Disabled,
    };
    let connectivity = SharedConnectivity::new(online);
    let mut reconciler = Reconciler::new(
        SqliteLocalStore::new(db.connection()),
        remote,
        connectivity.clone(),
    );

    match cli.command {
        Some(Commands::Add { title, content }) => {
            run_add(&mut reconciler, &owner, title, &content).await?;
        }
        Some(Commands::List { json }) => run_list(&mut reconciler, &owner, json)?,
        Some(Commands::Edit { id, title, content }) => {
            run_edit(&mut reconciler, &owner, &id, title, &content).await?;
        }
        Some(Commands::Delete { id }) => run_delete(&mut reconciler, &owner, &id).await?,
        Some(Commands::Pin { id }) => run_set_pin(&mut reconciler, &owner, &id, true).await?,
        Some(Commands::Unpin { id }) => run_set_pin(&mut reconciler, &owner, &id, false).await?,
        Some(Commands::Sync) => {
            if remote_config.is_none() {
                return Err(CliError::SyncNotConfigured);
            }
            run_sync(&mut reconciler, &owner).await?;
        }
        Some(Commands::Status) => run_status(&reconciler, &owner)?,
        Some(Commands::Watch) => {
            if remote_config.is_none() {
                return Err(CliError::SyncNotConfigured);
            }
            run_watch(&mut reconciler, owner.clone()).await?;
        }
        Some(Commands::Purge { yes }) => run_purge(&reconciler, &owner, yes)?,
        None => {
            // Quick capture mode: loam "my thought"
            run_add(&mut reconciler, &owner, None, &cli.note).await?;
        }
    }

    Ok(())
}

type CliReconciler<'a> = Reconciler<SqliteLocalStore<'a>, CliRemote, SharedConnectivity>;

async fn run_add(
    reconciler: &mut CliReconciler<'_>,
    owner: &OwnerId,
    title: Option<String>,
    content_parts: &[String],
) -> Result<(), CliError> {
    let content = resolve_note_content(content_parts)?;
    let note = reconciler
        .create_note(owner, title.unwrap_or_default(), content)
        .await?;
    println!("{}", note.id);
    Ok(())
}

#[derive(Debug, Serialize)]
struct NoteListItem {
    id: String,
    title: String,
    preview: String,
    pinned: bool,
    updated_at: String,
    relative_time: String,
    tags: Vec<String>,
}

fn run_list(
    reconciler: &mut CliReconciler<'_>,
    owner: &OwnerId,
    as_json: bool,
) -> Result<(), CliError> {
    let notes = reconciler.hydrate(owner)?;

    if as_json {
        let json_items = notes.iter().map(note_to_list_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_note_lines(&notes) {
            println!("{line}");
        }
    }

    Ok(())
}

async fn run_edit(
    reconciler: &mut CliReconciler<'_>,
    owner: &OwnerId,
    id: &str,
    title: Option<String>,
    content_parts: &[String],
) -> Result<(), CliError> {
    let mut note = resolve_note(reconciler, owner, id)?;

    let content = normalize_content(&content_parts.join(" "));
    if title.is_none() && content.is_none() {
        return Err(CliError::EmptyContent);
    }
    if let Some(title) = title {
        note.title = title;
    }
    if let Some(content) = content {
        note.content = content;
    }

    let updated = reconciler.update_note(note).await?;
    println!("{}", updated.id);
    Ok(())
}

async fn run_delete(
    reconciler: &mut CliReconciler<'_>,
    owner: &OwnerId,
    id: &str,
) -> Result<(), CliError> {
    let note = resolve_note(reconciler, owner, id)?;
    reconciler.delete_note(owner, &note.id).await?;
    println!("{}", note.id);
    Ok(())
}

async fn run_set_pin(
    reconciler: &mut CliReconciler<'_>,
    owner: &OwnerId,
    id: &str,
    pinned: bool,
) -> Result<(), CliError> {
    let note = resolve_note(reconciler, owner, id)?;
    if note.is_pinned() == pinned {
        println!("{}", note.id);
        return Ok(());
    }

    let updated = reconciler.toggle_pin(owner, &note.id).await?;
    println!("{}", updated.id);
    Ok(())
}

async fn run_sync(reconciler: &mut CliReconciler<'_>, owner: &OwnerId) -> Result<(), CliError> {
    reconciler.reconcile(owner).await?;

    let status = reconciler.status(owner)?;
    if status.pending == 0 {
        println!("Sync completed");
    } else {
        println!(
            "Sync incomplete: {} op(s) still queued, will retry",
            status.pending
        );
    }
    Ok(())
}

fn run_status(reconciler: &CliReconciler<'_>, owner: &OwnerId) -> Result<(), CliError> {
    let status = reconciler.status(owner)?;
    let meta = reconciler.store().sync_meta(owner)?;
    let now_ms = Utc::now().timestamp_millis();

    let state = match status.state {
        SyncState::Offline => "offline",
        SyncState::Syncing => "syncing",
        SyncState::Synced => "synced",
    };

    println!("owner:       {owner}");
    println!("state:       {state}");
    println!("pending ops: {}", status.pending);
    println!("dirty:       {}", status.dirty);
    println!(
        "last fetch:  {}",
        meta.last_fetched_at
            .map_or_else(|| "never".to_string(), |ts| {
                format_relative_time(ts.timestamp_millis(), now_ms)
            })
    );
    println!(
        "last full:   {}",
        meta.last_full_sync_at
            .map_or_else(|| "never".to_string(), |ts| {
                format_relative_time(ts.timestamp_millis(), now_ms)
            })
    );
    Ok(())
}

async fn run_watch(reconciler: &mut CliReconciler<'_>, owner: OwnerId) -> Result<(), CliError> {
    // No realtime feed is wired up yet; the session still runs connectivity
    // transitions and periodic reconciles until interrupted
    let (_events_tx, events_rx) = tokio::sync::mpsc::channel::<RealtimeEvent>(16);
    let session = SyncSession::new(reconciler, owner, events_rx);

    println!("Watching for changes (Ctrl-C to stop)");
    tokio::select! {
        result = session.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("Stopped");
        }
    }
    Ok(())
}

fn run_purge(
    reconciler: &CliReconciler<'_>,
    owner: &OwnerId,
    confirmed: bool,
) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::PurgeNotConfirmed);
    }

    reconciler.store().clear_all_for_owner(owner)?;
    println!("Purged all local data for {owner}");
    Ok(())
}

fn resolve_note(
    reconciler: &CliReconciler<'_>,
    owner: &OwnerId,
    query: &str,
) -> Result<Note, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyNoteId);
    }

    let notes = reconciler.store().list_by_owner(owner)?;
    resolve_note_by_prefix(&notes, query)
}

/// Resolve a note by full id or unique id prefix.
fn resolve_note_by_prefix(notes: &[Note], query: &str) -> Result<Note, CliError> {
    if let Some(exact) = notes.iter().find(|note| note.id.as_str() == query) {
        return Ok(exact.clone());
    }

    let matches: Vec<&Note> = notes
        .iter()
        .filter(|note| note.id.as_str().starts_with(query))
        .collect();

    match matches.len() {
        0 => Err(CliError::NoteNotFound(query.to_string())),
        1 => Ok(matches[0].clone()),
        _ => {
            let options = matches
                .iter()
                .take(3)
                .map(|note| note.id.as_str().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousNoteId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let short_id = note.id.as_str().chars().take(13).collect::<String>();
            let marker = if note.is_pinned() { "*" } else { " " };
            let preview = note_preview(note, 40);
            let relative_time = format_relative_time(note.updated_at.timestamp_millis(), now_ms);
            format!("{short_id:<13} {marker} {preview:<40}  {relative_time}")
        })
        .collect()
}

fn note_to_list_item(note: &Note) -> NoteListItem {
    let now_ms = Utc::now().timestamp_millis();
    NoteListItem {
        id: note.id.to_string(),
        title: note.title.clone(),
        preview: note_preview(note, 80),
        pinned: note.is_pinned(),
        updated_at: note.updated_at.to_rfc3339(),
        relative_time: format_relative_time(note.updated_at.timestamp_millis(), now_ms),
        tags: note.tags.iter().cloned().collect(),
    }
}

fn note_preview(note: &Note, max_chars: usize) -> String {
    let source = if note.title.trim().is_empty() {
        loam_core::models::strip_markup(&note.content)
    } else {
        note.title.clone()
    };
    let first_line = source.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

fn resolve_note_content(content_parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&content_parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

fn resolve_owner(
    cli_owner: Option<String>,
    store: &SqliteLocalStore<'_>,
) -> Result<OwnerId, CliError> {
    if let Some(owner) = cli_owner.and_then(|owner| normalize_content(&owner)) {
        return Ok(OwnerId::new(owner));
    }
    if let Some(owner) = env::var("LOAM_OWNER").ok().and_then(|o| normalize_content(&o)) {
        return Ok(OwnerId::new(owner));
    }
    store.last_known_owner()?.ok_or(CliError::MissingOwner)
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("LOAM_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loam")
        .join("loam.db")
}

fn remote_config_from_env() -> Option<RemoteConfig> {
    parse_remote_config(
        env::var("LOAM_REMOTE_URL").ok(),
        env::var("LOAM_REMOTE_TOKEN").ok(),
    )
}

fn parse_remote_config(url: Option<String>, token: Option<String>) -> Option<RemoteConfig> {
    let url = normalize_content(&url?)?;
    Some(RemoteConfig {
        url,
        token: token.and_then(|token| normalize_content(&token)),
    })
}
