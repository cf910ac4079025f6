//! Backend trait definitions

use super::payload::RawChange;
use crate::model::{Bookmark, BookmarkId, Identity, IdentityId, NewBookmark, SignIn};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Errors a backend can report
///
/// `Rejected` and `Unavailable` carry the provider's own message; their
/// `Display` is that message and nothing else.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    /// The provider refused the request (authorization, constraint, missing row)
    #[error("{0}")]
    Rejected(String),

    /// The provider could not be reached or is in an unusable state
    #[error("{0}")]
    Unavailable(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Where a subscription delivers raw change payloads
pub type ChangeSink = mpsc::UnboundedSender<RawChange>;

/// Handle returned by `subscribe`, redeemed by `unsubscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// The capability contract the client consumes
///
/// Record operations are scoped by the provider to the signed-in identity;
/// the client is never the trust boundary.
#[async_trait]
pub trait Backend: Send + Sync {
    // === Identity ===

    /// The currently signed-in identity, if any
    async fn current_identity(&self) -> BackendResult<Option<Identity>>;

    /// Receiver that observes every identity change (`None` on sign-out)
    fn identity_changes(&self) -> watch::Receiver<Option<Identity>>;

    /// Establish an identity
    async fn sign_in(&self, request: SignIn) -> BackendResult<Identity>;

    /// Clear the current identity
    async fn sign_out(&self) -> BackendResult<()>;

    // === Records ===

    /// All bookmarks owned by `owner`, newest first
    async fn list_owned(&self, owner: &IdentityId) -> BackendResult<Vec<Bookmark>>;

    /// Insert a bookmark. The created row is only observable through the
    /// change feed or a later `list_owned`.
    async fn insert(&self, bookmark: NewBookmark) -> BackendResult<()>;

    /// Delete a bookmark owned by the current identity
    async fn delete_by_id(&self, id: &BookmarkId) -> BackendResult<()>;

    // === Change feed ===

    /// Start delivering changes to rows owned by `owner` into `sink`
    async fn subscribe(&self, owner: &IdentityId, sink: ChangeSink) -> BackendResult<SubscriptionId>;

    /// Stop a subscription. Unknown handles are ignored.
    fn unsubscribe(&self, subscription: SubscriptionId);
}

/// Extension trait for backends that live in a database file
pub trait OpenBackend: Backend + Sized {
    /// Open or create a backend at the given path
    fn open(path: impl AsRef<Path>) -> BackendResult<Self>;

    /// Create an in-memory database (useful for testing)
    fn open_in_memory() -> BackendResult<Self>;
}
