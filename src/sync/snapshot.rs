//! The ordered, id-unique list a session materializes
//!
//! Reconciliation rules, applied one event at a time in arrival order:
//! - insert of a known id replaces it in place, otherwise prepends;
//! - update replaces in place, unknown ids are ignored;
//! - delete removes, unknown ids are ignored.

use crate::model::{Bookmark, BookmarkId};
use crate::store::ChangeEvent;

/// What applying one event did to the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New entry placed at index 0
    Prepended,
    /// Duplicate insert overwrote an existing entry
    Replaced,
    Updated,
    Removed,
    /// Event referred to an id not in the snapshot
    Ignored,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Bookmarks newest first, unique by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<Bookmark>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a bulk query result, already newest first.
    ///
    /// Later duplicates of an id are dropped.
    pub fn from_rows(rows: Vec<Bookmark>) -> Self {
        let mut entries: Vec<Bookmark> = Vec::with_capacity(rows.len());
        for row in rows {
            if !entries.iter().any(|e| e.id == row.id) {
                entries.push(row);
            }
        }
        Self { entries }
    }

    pub fn apply(&mut self, event: ChangeEvent) -> Applied {
        match event {
            ChangeEvent::Insert(bookmark) => match self.position(&bookmark.id) {
                Some(idx) => {
                    self.entries[idx] = bookmark;
                    Applied::Replaced
                }
                None => {
                    self.entries.insert(0, bookmark);
                    Applied::Prepended
                }
            },
            ChangeEvent::Update(bookmark) => match self.position(&bookmark.id) {
                Some(idx) => {
                    self.entries[idx] = bookmark;
                    Applied::Updated
                }
                None => Applied::Ignored,
            },
            ChangeEvent::Delete(id) => match self.position(&id) {
                Some(idx) => {
                    self.entries.remove(idx);
                    Applied::Removed
                }
                None => Applied::Ignored,
            },
        }
    }

    pub fn position(&self, id: &BookmarkId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    pub fn contains(&self, id: &BookmarkId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: &BookmarkId) -> Option<&Bookmark> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bookmark> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Bookmark] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }
}
