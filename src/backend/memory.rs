//! In-process backend
//!
//! Rows live in a `DashMap`; the change feed is a fan-out over the
//! subscribers' channels, published synchronously in commit order.

use super::payload::RawChange;
use super::traits::{Backend, BackendError, BackendResult, ChangeSink, SubscriptionId};
use crate::model::{Bookmark, BookmarkId, Identity, IdentityId, NewBookmark, SignIn};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

struct Subscriber {
    owner: IdentityId,
    sink: ChangeSink,
}

/// In-memory capability provider
pub struct MemoryBackend {
    rows: DashMap<BookmarkId, Bookmark>,
    identity: watch::Sender<Option<Identity>>,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_subscription: AtomicU64,
    /// Last assigned `created_at`, so timestamps stay strictly increasing
    clock: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            rows: DashMap::new(),
            identity,
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            clock: Mutex::new(None),
        }
    }

    /// A backend with `identity` already signed in
    pub fn with_identity(identity: Identity) -> Self {
        let backend = Self::new();
        backend.identity.send_replace(Some(identity));
        backend
    }

    /// Number of live subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers().map(|subs| subs.len()).unwrap_or(0)
    }

    /// Change a stored title out of band, emitting an update event.
    ///
    /// The client never issues updates itself; this models edits made
    /// through another surface of the hosted service.
    pub fn retitle(&self, id: &BookmarkId, title: impl Into<String>) -> BackendResult<()> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(BackendError::Rejected("title must not be empty".to_string()));
        }
        let updated = {
            let mut row = self
                .rows
                .get_mut(id)
                .ok_or_else(|| BackendError::Rejected(format!("bookmark {} not found", id)))?;
            row.title = title;
            row.clone()
        };
        self.publish(&updated.owner, RawChange::update(&updated)?)
    }

    fn subscribers(&self) -> BackendResult<MutexGuard<'_, HashMap<SubscriptionId, Subscriber>>> {
        self.subscribers
            .lock()
            .map_err(|_| BackendError::Unavailable("subscriber registry poisoned".to_string()))
    }

    fn publish(&self, owner: &IdentityId, change: RawChange) -> BackendResult<()> {
        let mut subs = self.subscribers()?;
        subs.retain(|id, sub| {
            if &sub.owner != owner {
                return true;
            }
            let delivered = sub.sink.send(change.clone()).is_ok();
            if !delivered {
                debug!(subscription = %id, "dropping subscriber with closed sink");
            }
            delivered
        });
        Ok(())
    }

    fn next_timestamp(&self) -> BackendResult<DateTime<Utc>> {
        let mut last = self
            .clock
            .lock()
            .map_err(|_| BackendError::Unavailable("clock poisoned".to_string()))?;
        let now = Utc::now();
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        Ok(next)
    }

    fn require_identity(&self) -> BackendResult<Identity> {
        self.identity
            .borrow()
            .clone()
            .ok_or_else(|| BackendError::Rejected("not signed in".to_string()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn current_identity(&self) -> BackendResult<Option<Identity>> {
        Ok(self.identity.borrow().clone())
    }

    fn identity_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    async fn sign_in(&self, request: SignIn) -> BackendResult<Identity> {
        let identity = request.into_identity();
        info!(user = %identity.id, "signed in");
        self.identity.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        if let Some(previous) = self.identity.send_replace(None) {
            info!(user = %previous.id, "signed out");
        }
        Ok(())
    }

    async fn list_owned(&self, owner: &IdentityId) -> BackendResult<Vec<Bookmark>> {
        // Rows of anyone but the caller are invisible, not an error.
        let caller = self.identity.borrow().as_ref().map(|i| i.id.clone());
        if caller.as_ref() != Some(owner) {
            return Ok(Vec::new());
        }
        let mut rows: Vec<Bookmark> = self
            .rows
            .iter()
            .filter(|r| &r.owner == owner)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn insert(&self, bookmark: NewBookmark) -> BackendResult<()> {
        let caller = self.require_identity()?;
        if caller.id != bookmark.owner {
            return Err(BackendError::Rejected(
                "new row violates row-level security policy for table \"bookmarks\"".to_string(),
            ));
        }
        if bookmark.title.is_empty() || bookmark.url.is_empty() {
            return Err(BackendError::Rejected("title and url are required".to_string()));
        }
        let row = bookmark.into_bookmark(BookmarkId::new(), self.next_timestamp()?);
        debug!(id = %row.id, owner = %row.owner, "inserted bookmark");
        self.rows.insert(row.id.clone(), row.clone());
        self.publish(&row.owner, RawChange::insert(&row)?)
    }

    async fn delete_by_id(&self, id: &BookmarkId) -> BackendResult<()> {
        let caller = self.require_identity()?;
        let removed = self.rows.remove_if(id, |_, row| row.owner == caller.id);
        match removed {
            Some((id, row)) => {
                debug!(id = %id, "deleted bookmark");
                self.publish(&row.owner, RawChange::delete(&id))
            }
            None => Err(BackendError::Rejected(format!(
                "bookmark {} not found for current user",
                id
            ))),
        }
    }

    async fn subscribe(&self, owner: &IdentityId, sink: ChangeSink) -> BackendResult<SubscriptionId> {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers()?.insert(
            id,
            Subscriber {
                owner: owner.clone(),
                sink,
            },
        );
        debug!(subscription = %id, owner = %owner, "subscribed");
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Ok(mut subs) = self.subscribers() {
            if subs.remove(&subscription).is_some() {
                debug!(subscription = %subscription, "unsubscribed");
            }
        }
    }
}
