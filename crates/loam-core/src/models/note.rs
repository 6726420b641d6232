//! Note model

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved tag that promotes a note to the top of list ordering.
pub const PINNED_TAG: &str = "pinned";

/// Sentinel id used by optimistic pre-save rows. Never persisted to the
/// remote store and exempt from remote deletion sweeps.
const PLACEHOLDER_ID: &str = "temp";

/// A unique identifier for a note.
///
/// Ids are opaque stable strings. Notes created locally mint a UUID v7
/// (time-sortable); ids received from the remote store are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Wrap an existing id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a new unique note ID using UUID v7
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// The sentinel id for an optimistic pre-save row
    #[must_use]
    pub fn placeholder() -> Self {
        Self(PLACEHOLDER_ID.to_string())
    }

    /// Whether this is the optimistic pre-save sentinel
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.0 == PLACEHOLDER_ID
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated user whose notes are being synchronized.
///
/// All store and queue state is partitioned by this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Wrap an owner id string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A note in the system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique identifier, stable across devices
    pub id: NoteId,
    /// Owner partition key
    pub owner_id: OwnerId,
    /// Title line
    pub title: String,
    /// Rich-text body, treated as an opaque blob
    pub content: String,
    /// Last update timestamp, the authoritative ordering key
    pub updated_at: DateTime<Utc>,
    /// Unordered tag set; `pinned` is reserved and only affects sort order
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Note {
    /// Create a new note with a freshly minted id
    #[must_use]
    pub fn new(owner_id: OwnerId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: NoteId::generate(),
            owner_id,
            title: title.into(),
            content: content.into(),
            updated_at: Utc::now(),
            tags: BTreeSet::new(),
        }
    }

    /// Whether the reserved `pinned` tag is set
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.tags.contains(PINNED_TAG)
    }

    /// Set or clear the reserved `pinned` tag
    pub fn set_pinned(&mut self, pinned: bool) {
        if pinned {
            self.tags.insert(PINNED_TAG.to_string());
        } else {
            self.tags.remove(PINNED_TAG);
        }
    }

    /// Refresh `updated_at` to now
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whether the note carries anything worth showing: a nonempty title or
    /// nonempty markup-stripped content. Partially written drafts fail this.
    #[must_use]
    pub fn has_material_content(&self) -> bool {
        !self.title.trim().is_empty() || !strip_markup(&self.content).trim().is_empty()
    }
}

/// Strip markup tags and entity spacing from rich-text content.
///
/// The content blob is otherwise opaque; this is only used to decide whether
/// a note is blank.
///
/// # Examples
///
/// ```
/// use loam_core::models::strip_markup;
///
/// assert_eq!(strip_markup("<p>Hello <b>world</b></p>"), "Hello world");
/// assert_eq!(strip_markup("<p>&nbsp;</p>").trim(), "");
/// ```
#[must_use]
pub fn strip_markup(text: &str) -> String {
    let re = Regex::new(r"<[^>]*>").expect("Invalid regex");
    re.replace_all(text, "").replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_id_unique() {
        let id1 = NoteId::generate();
        let id2 = NoteId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_note_id_placeholder() {
        let id = NoteId::placeholder();
        assert!(id.is_placeholder());
        assert!(!NoteId::generate().is_placeholder());
    }

    #[test]
    fn test_note_new() {
        let note = Note::new(OwnerId::new("alice"), "Title", "Body");
        assert_eq!(note.title, "Title");
        assert_eq!(note.content, "Body");
        assert!(note.tags.is_empty());
        assert!(!note.is_pinned());
    }

    #[test]
    fn test_pin_toggle() {
        let mut note = Note::new(OwnerId::new("alice"), "Title", "Body");
        note.set_pinned(true);
        assert!(note.is_pinned());
        assert!(note.tags.contains(PINNED_TAG));

        note.set_pinned(false);
        assert!(!note.is_pinned());
        assert!(note.tags.is_empty());
    }

    #[test]
    fn test_touch_advances_timestamp() {
        let mut note = Note::new(OwnerId::new("alice"), "Title", "Body");
        let before = note.updated_at;
        note.touch();
        assert!(note.updated_at >= before);
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<p>Hello</p>"), "Hello");
        assert_eq!(strip_markup("plain"), "plain");
        assert_eq!(strip_markup("<div><br/></div>"), "");
        assert_eq!(strip_markup("a&nbsp;b"), "a b");
    }

    #[test]
    fn test_has_material_content() {
        let mut note = Note::new(OwnerId::new("alice"), "", "");
        assert!(!note.has_material_content());

        note.content = "<p>&nbsp;</p>".to_string();
        assert!(!note.has_material_content());

        note.content = "<p>text</p>".to_string();
        assert!(note.has_material_content());

        note.content = String::new();
        note.title = "Title only".to_string();
        assert!(note.has_material_content());
    }

    #[test]
    fn test_note_serde_roundtrip() {
        let mut note = Note::new(OwnerId::new("alice"), "Title", "Body");
        note.set_pinned(true);

        let json = serde_json::to_string(&note).unwrap();
        let parsed: Note = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, note);
    }
}
