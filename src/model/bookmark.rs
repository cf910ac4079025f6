//! Bookmark: a saved URL owned by exactly one identity

use super::identity::IdentityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a bookmark
///
/// Opaque to the client. Backends mint them; serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookmarkId(String);

impl BookmarkId {
    /// Create a new random BookmarkId (UUID-based)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BookmarkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BookmarkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BookmarkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A stored bookmark row
///
/// Field names on the wire follow the backend's row shape (`user_id`
/// for the owner), so change payloads deserialize straight into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Unique identifier
    pub id: BookmarkId,
    /// Owning identity
    #[serde(rename = "user_id")]
    pub owner: IdentityId,
    /// Display title, never empty
    pub title: String,
    /// Absolute URL
    pub url: String,
    /// Assigned by the backend on insert, immutable afterwards
    pub created_at: DateTime<Utc>,
}

/// Insert payload: everything the client decides about a new bookmark.
///
/// The backend assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBookmark {
    #[serde(rename = "user_id")]
    pub owner: IdentityId,
    pub title: String,
    pub url: String,
}

impl NewBookmark {
    pub fn new(owner: IdentityId, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            owner,
            title: title.into(),
            url: url.into(),
        }
    }

    /// Materialize the row the backend stores for this payload.
    pub fn into_bookmark(self, id: BookmarkId, created_at: DateTime<Utc>) -> Bookmark {
        Bookmark {
            id,
            owner: self.owner,
            title: self.title,
            url: self.url,
            created_at,
        }
    }
}
