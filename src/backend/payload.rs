//! Raw change-feed payloads as the provider emits them
//!
//! Shape: `{"eventType": "INSERT", "new": {row}, "old": {}}`. Deletes carry
//! only the primary key in `old`. Nothing here is validated; the store
//! adapter turns payloads into typed events.

use crate::model::{Bookmark, BookmarkId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The three row-level change kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An untyped change payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawChange(pub Value);

impl RawChange {
    pub fn insert(row: &Bookmark) -> serde_json::Result<Self> {
        Ok(Self(json!({
            "eventType": ChangeKind::Insert.as_str(),
            "new": serde_json::to_value(row)?,
            "old": {},
        })))
    }

    pub fn update(row: &Bookmark) -> serde_json::Result<Self> {
        Ok(Self(json!({
            "eventType": ChangeKind::Update.as_str(),
            "new": serde_json::to_value(row)?,
            "old": { "id": row.id },
        })))
    }

    pub fn delete(id: &BookmarkId) -> Self {
        Self(json!({
            "eventType": ChangeKind::Delete.as_str(),
            "new": {},
            "old": { "id": id },
        }))
    }

    /// The declared change kind, if the payload names a known one
    pub fn kind(&self) -> Option<ChangeKind> {
        self.0.get("eventType").and_then(Value::as_str).and_then(ChangeKind::parse)
    }

    pub fn new_record(&self) -> Option<&Value> {
        self.0.get("new")
    }

    pub fn old_record(&self) -> Option<&Value> {
        self.0.get("old")
    }
}
