//! In-memory remote store used by sync tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{Note, NoteId, OwnerId};

use super::remote::RemoteStore;

/// Purpose-built fake remote: a keyed map plus switches to fail mutation
/// calls, and a call log for asserting fetch behavior.
pub(crate) struct MockRemote {
    notes: RefCell<BTreeMap<(String, String), Note>>,
    calls: RefCell<Vec<String>>,
    fail_mutations: Cell<bool>,
    fail_lists: Cell<bool>,
    fail_on_mutation: Cell<Option<usize>>,
    mutation_calls: Cell<usize>,
}

impl MockRemote {
    pub(crate) fn new() -> Self {
        Self {
            notes: RefCell::new(BTreeMap::new()),
            calls: RefCell::new(Vec::new()),
            fail_mutations: Cell::new(false),
            fail_lists: Cell::new(false),
            fail_on_mutation: Cell::new(None),
            mutation_calls: Cell::new(0),
        }
    }

    pub(crate) fn seed(&self, note: Note) {
        self.notes.borrow_mut().insert(
            (note.owner_id.as_str().to_string(), note.id.as_str().to_string()),
            note,
        );
    }

    pub(crate) fn notes_for(&self, owner: &OwnerId) -> Vec<Note> {
        self.notes
            .borrow()
            .values()
            .filter(|note| &note.owner_id == owner)
            .cloned()
            .collect()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Fail every mutation call until cleared
    pub(crate) fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.set(fail);
    }

    /// Fail exactly the n-th mutation call (1-based), once
    pub(crate) fn fail_on_mutation(&self, n: usize) {
        self.fail_on_mutation.set(Some(n));
    }

    /// Fail every list call until cleared
    pub(crate) fn set_fail_lists(&self, fail: bool) {
        self.fail_lists.set(fail);
    }

    fn list_gate(&self) -> Result<()> {
        if self.fail_lists.get() {
            return Err(Error::RemoteUnavailable("mock remote refused".to_string()));
        }
        Ok(())
    }

    fn mutation_gate(&self) -> Result<()> {
        let call = self.mutation_calls.get() + 1;
        self.mutation_calls.set(call);

        if self.fail_mutations.get() || self.fail_on_mutation.get() == Some(call) {
            return Err(Error::RemoteUnavailable("mock remote refused".to_string()));
        }
        Ok(())
    }
}

impl RemoteStore for MockRemote {
    async fn upsert(&self, note: &Note) -> Result<Note> {
        self.calls.borrow_mut().push(format!("upsert:{}", note.id));
        self.mutation_gate()?;
        self.seed(note.clone());
        Ok(note.clone())
    }

    async fn delete_by_id(&self, owner: &OwnerId, id: &NoteId) -> Result<()> {
        self.calls.borrow_mut().push(format!("delete:{id}"));
        self.mutation_gate()?;
        self.notes
            .borrow_mut()
            .remove(&(owner.as_str().to_string(), id.as_str().to_string()));
        Ok(())
    }

    async fn list_since(&self, owner: &OwnerId, since: DateTime<Utc>) -> Result<Vec<Note>> {
        self.calls.borrow_mut().push(format!("list_since:{owner}"));
        self.list_gate()?;
        Ok(self
            .notes_for(owner)
            .into_iter()
            .filter(|note| note.updated_at > since)
            .collect())
    }

    async fn list_all(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        self.calls.borrow_mut().push(format!("list_all:{owner}"));
        self.list_gate()?;
        Ok(self.notes_for(owner))
    }
}
