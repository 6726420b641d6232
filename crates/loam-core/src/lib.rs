//! loam-core - Core library for Loam
//!
//! This crate contains the shared models, the durable local note mirror, and
//! the synchronization reconciler used by all Loam interfaces.

pub mod db;
pub mod error;
pub mod models;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Note, NoteId, OwnerId};
