//! Typed change events
//!
//! Raw provider payloads are checked here, once. Anything that does not
//! describe a well-formed insert, update, or delete is a `FeedError` and
//! never reaches the view model.

use crate::backend::{ChangeKind, RawChange};
use crate::model::{Bookmark, BookmarkId};
use serde_json::Value;
use thiserror::Error;

/// A validated row-level change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A row was created
    Insert(Bookmark),
    /// A row's attributes changed
    Update(Bookmark),
    /// A row was removed; only its key survives
    Delete(BookmarkId),
}

impl ChangeEvent {
    /// The id of the row this event concerns
    pub fn id(&self) -> &BookmarkId {
        match self {
            Self::Insert(b) | Self::Update(b) => &b.id,
            Self::Delete(id) => id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update(_) => ChangeKind::Update,
            Self::Delete(_) => ChangeKind::Delete,
        }
    }

    /// Validate a raw payload
    pub fn from_raw(raw: &RawChange) -> Result<Self, FeedError> {
        let kind = match raw.0.get("eventType").and_then(Value::as_str) {
            Some(name) => ChangeKind::parse(name).ok_or_else(|| FeedError::UnknownKind(name.to_string()))?,
            None => return Err(FeedError::UnknownKind(String::new())),
        };
        match kind {
            ChangeKind::Insert => Ok(Self::Insert(record(raw.new_record(), kind)?)),
            ChangeKind::Update => Ok(Self::Update(record(raw.new_record(), kind)?)),
            ChangeKind::Delete => raw
                .old_record()
                .and_then(|old| old.get("id"))
                .and_then(Value::as_str)
                .map(|id| Self::Delete(BookmarkId::from(id)))
                .ok_or(FeedError::MissingKey),
        }
    }
}

fn record(value: Option<&Value>, kind: ChangeKind) -> Result<Bookmark, FeedError> {
    let value = value.ok_or(FeedError::MissingRecord(kind))?;
    let bookmark: Bookmark = serde_json::from_value(value.clone())?;
    if bookmark.title.is_empty() {
        return Err(FeedError::EmptyTitle(bookmark.id));
    }
    Ok(bookmark)
}

/// Why a raw payload was refused
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown change kind: {0:?}")]
    UnknownKind(String),

    #[error("{0} payload has no new record")]
    MissingRecord(ChangeKind),

    #[error("delete payload has no id")]
    MissingKey,

    #[error("malformed record: {0}")]
    MalformedRecord(#[from] serde_json::Error),

    #[error("record {0} has an empty title")]
    EmptyTitle(BookmarkId),
}
