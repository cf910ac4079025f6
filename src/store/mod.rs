//! Bookmark store adapter
//!
//! Maps client intents onto `Backend` calls. Holds no state of its own and
//! passes provider errors through untouched. Subscriptions come back as a
//! `Feed`: a `Subscription` guard that releases the backend subscription
//! when dropped, plus the stream of validated events.

mod events;

pub use events::{ChangeEvent, FeedError};

use crate::backend::{Backend, BackendResult, RawChange, SubscriptionId};
use crate::model::{Bookmark, BookmarkId, Identity, IdentityId, NewBookmark, SignIn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Stateless front for a capability provider
#[derive(Clone)]
pub struct BookmarkStore {
    backend: Arc<dyn Backend>,
}

impl BookmarkStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub async fn current_identity(&self) -> BackendResult<Option<Identity>> {
        self.backend.current_identity().await
    }

    pub fn identity_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.backend.identity_changes()
    }

    pub async fn sign_in(&self, request: SignIn) -> BackendResult<Identity> {
        self.backend.sign_in(request).await
    }

    pub async fn sign_out(&self) -> BackendResult<()> {
        self.backend.sign_out().await
    }

    /// Bookmarks owned by `owner`, newest first
    pub async fn list(&self, owner: &IdentityId) -> BackendResult<Vec<Bookmark>> {
        self.backend.list_owned(owner).await
    }

    pub async fn insert(&self, owner: &IdentityId, title: &str, url: &str) -> BackendResult<()> {
        self.backend
            .insert(NewBookmark::new(owner.clone(), title, url))
            .await
    }

    pub async fn delete(&self, id: &BookmarkId) -> BackendResult<()> {
        self.backend.delete_by_id(id).await
    }

    /// Open the owner-scoped change feed
    pub async fn subscribe(&self, owner: &IdentityId) -> BackendResult<Feed> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.backend.subscribe(owner, tx).await?;
        Ok(Feed {
            subscription: Subscription {
                backend: Arc::clone(&self.backend),
                id: Some(id),
            },
            events: FeedEvents { raw: rx },
        })
    }
}

/// An open change feed
pub struct Feed {
    pub subscription: Subscription,
    pub events: FeedEvents,
}

/// Releases its backend subscription exactly once, on `release` or drop
pub struct Subscription {
    backend: Arc<dyn Backend>,
    id: Option<SubscriptionId>,
}

impl Subscription {
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    pub fn release(&mut self) {
        if let Some(id) = self.id.take() {
            debug!(subscription = %id, "releasing subscription");
            self.backend.unsubscribe(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Validated events in delivery order
pub struct FeedEvents {
    raw: mpsc::UnboundedReceiver<RawChange>,
}

impl FeedEvents {
    /// Next well-formed event. Malformed payloads are logged and skipped.
    /// Returns `None` once the backend stops delivering.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            let raw = self.raw.recv().await?;
            match ChangeEvent::from_raw(&raw) {
                Ok(event) => return Some(event),
                Err(e) => warn!(error = %e, payload = %raw.0, "dropping malformed change payload"),
            }
        }
    }
}
