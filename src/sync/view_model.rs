//! SyncViewModel: one live, reconciled view of the signed-in user's bookmarks
//!
//! A session is one identity's view: a bulk read, then a single change-feed
//! subscription whose events a pump task applies in delivery order. Every
//! session gets a fresh epoch; results and events carrying an older epoch
//! are discarded, so a response that outlives its session can never write
//! into the next identity's view.

use super::intent::{resolve_title, validate_url, SyncError, SyncResult};
use super::snapshot::{Applied, Snapshot};
use crate::backend::{Backend, ChangeKind};
use crate::model::{Bookmark, BookmarkId, Identity};
use crate::store::{BookmarkStore, ChangeEvent, Subscription};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the current session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No identity; empty view, no subscription
    Unauthenticated,
    /// Identity known, bulk read in flight
    Loading,
    /// Bulk read resolved; live events are being applied
    Ready,
}

/// Everything presentation needs to render, cloned out of the view model
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub identity: Option<Identity>,
    pub phase: Phase,
    pub snapshot: Snapshot,
    /// Ids with a delete call in flight
    pub deleting: BTreeSet<BookmarkId>,
    /// Message from a failed initial load, for transient display
    pub load_error: Option<String>,
    /// True once the change feed is being applied
    pub live: bool,
}

impl ViewState {
    fn signed_out() -> Self {
        Self {
            identity: None,
            phase: Phase::Unauthenticated,
            snapshot: Snapshot::new(),
            deleting: BTreeSet::new(),
            load_error: None,
            live: false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn is_deleting(&self, id: &BookmarkId) -> bool {
        self.deleting.contains(id)
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        self.snapshot.as_slice()
    }
}

struct State {
    epoch: u64,
    view: ViewState,
}

struct Inner {
    state: Mutex<State>,
    revision: watch::Sender<u64>,
}

impl Inner {
    // The state is plain data; a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn apply(&self, epoch: u64, event: ChangeEvent) {
        let changed = {
            let mut state = self.lock();
            if state.epoch != epoch {
                debug!(epoch, "dropping event for a closed session");
                return;
            }
            let id = event.id().clone();
            let kind = event.kind();
            let outcome = state.view.snapshot.apply(event);
            let unflagged = kind == ChangeKind::Delete && state.view.deleting.remove(&id);
            if outcome == Applied::Ignored {
                debug!(id = %id, kind = %kind, "no matching bookmark, event ignored");
            } else {
                debug!(id = %id, kind = %kind, outcome = ?outcome, "applied change");
            }
            outcome.changed() || unflagged
        };
        if changed {
            self.notify();
        }
    }
}

/// The live parts of an open session. Dropping it stops the pump and
/// releases the subscription.
struct Session {
    epoch: u64,
    subscription: Subscription,
    pump: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.pump.abort();
        self.subscription.release();
        debug!(epoch = self.epoch, "session closed");
    }
}

/// Owns the snapshot for the current identity and exposes the add/remove
/// intents. Presentation only ever reads `view()`.
pub struct SyncViewModel {
    store: BookmarkStore,
    inner: Arc<Inner>,
    session: Mutex<Option<Session>>,
}

impl SyncViewModel {
    pub fn new(store: BookmarkStore) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            store,
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    epoch: 0,
                    view: ViewState::signed_out(),
                }),
                revision,
            }),
            session: Mutex::new(None),
        }
    }

    pub fn from_backend(backend: Arc<dyn Backend>) -> Self {
        Self::new(BookmarkStore::new(backend))
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    /// Current view
    pub fn view(&self) -> ViewState {
        self.inner.lock().view.clone()
    }

    /// Receiver that ticks whenever the view changes
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Wait until `predicate` holds for the view, then return that view
    pub async fn wait_until<F>(&self, predicate: F) -> ViewState
    where
        F: Fn(&ViewState) -> bool,
    {
        let mut changes = self.changes();
        loop {
            let view = self.view();
            if predicate(&view) {
                return view;
            }
            if changes.changed().await.is_err() {
                return self.view();
            }
        }
    }

    /// True while a subscription is held
    pub fn has_session(&self) -> bool {
        self.session_slot().is_some()
    }

    /// Resolve the current identity and open a session for it
    pub async fn start(&self) -> SyncResult<()> {
        let identity = self.store.current_identity().await?;
        self.open(identity).await
    }

    /// Replace the current session with one for `identity`.
    ///
    /// `None` leaves the view empty and unsubscribed. A failed initial
    /// load is recorded in `load_error` and the feed is still opened; a
    /// failed subscribe is returned.
    pub async fn open(&self, identity: Option<Identity>) -> SyncResult<()> {
        self.teardown();
        let epoch = {
            let mut state = self.inner.lock();
            state.epoch += 1;
            state.view = ViewState {
                phase: if identity.is_some() {
                    Phase::Loading
                } else {
                    Phase::Unauthenticated
                },
                identity: identity.clone(),
                ..ViewState::signed_out()
            };
            state.epoch
        };
        self.inner.notify();

        let owner = match identity {
            Some(identity) => identity.id,
            None => {
                debug!(epoch, "no identity, view stays empty");
                return Ok(());
            }
        };

        let rows = self.store.list(&owner).await;
        {
            let mut state = self.inner.lock();
            if state.epoch != epoch {
                warn!(user = %owner, "discarding bookmark list for a superseded session");
                return Ok(());
            }
            match rows {
                Ok(rows) => {
                    debug!(user = %owner, count = rows.len(), "loaded bookmarks");
                    state.view.snapshot = Snapshot::from_rows(rows);
                }
                Err(e) => {
                    warn!(user = %owner, error = %e, "initial bookmark load failed");
                    state.view.load_error = Some(e.to_string());
                }
            }
            state.view.phase = Phase::Ready;
        }
        self.inner.notify();

        // Only after the bulk read: narrows, but does not close, the window
        // in which a change lands between the two.
        let feed = match self.store.subscribe(&owner).await {
            Ok(feed) => feed,
            Err(e) => {
                warn!(user = %owner, error = %e, "could not open change feed");
                let mut state = self.inner.lock();
                if state.epoch == epoch {
                    let message = match state.view.load_error.take() {
                        Some(earlier) => format!("{}; {}", earlier, e),
                        None => e.to_string(),
                    };
                    state.view.load_error = Some(message);
                }
                drop(state);
                self.inner.notify();
                return Err(e.into());
            }
        };
        if self.inner.lock().epoch != epoch {
            debug!(user = %owner, "session superseded before the feed opened");
            return Ok(());
        }

        let mut events = feed.events;
        let inner = Arc::clone(&self.inner);
        let pump = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                inner.apply(epoch, event);
            }
            debug!(epoch, "change feed ended");
        });
        let session = Session {
            epoch,
            subscription: feed.subscription,
            pump,
        };

        let mut slot = self.session_slot();
        {
            let mut state = self.inner.lock();
            if state.epoch != epoch {
                return Ok(());
            }
            state.view.live = true;
        }
        *slot = Some(session);
        drop(slot);
        self.inner.notify();
        info!(user = %owner, epoch, "session open");
        Ok(())
    }

    /// Rebuild the session on every identity change until the provider
    /// stops reporting them.
    pub async fn follow_identity(&self) {
        self.follow(self.store.identity_changes()).await
    }

    /// Like `follow_identity`, over a receiver the caller already holds.
    ///
    /// A change that keeps the same principal only refreshes its profile,
    /// unless that principal has no live feed, in which case the session
    /// is reopened.
    pub async fn follow(&self, mut changes: watch::Receiver<Option<Identity>>) {
        while changes.changed().await.is_ok() {
            let identity = changes.borrow_and_update().clone();
            let same_principal = {
                let mut state = self.inner.lock();
                let same = state.view.identity.as_ref().map(|i| &i.id)
                    == identity.as_ref().map(|i| &i.id)
                    && (identity.is_none() || state.view.live);
                if same {
                    state.view.identity = identity.clone();
                }
                same
            };
            if same_principal {
                self.inner.notify();
                continue;
            }
            info!(
                user = identity.as_ref().map(|i| i.id.as_str()).unwrap_or("-"),
                "identity changed, rebuilding view"
            );
            if let Err(e) = self.open(identity).await {
                warn!(error = %e, "failed to rebuild view after identity change");
            }
        }
    }

    /// End the session and clear the view
    pub fn close(&self) {
        self.teardown();
        {
            let mut state = self.inner.lock();
            state.epoch += 1;
            state.view = ViewState::signed_out();
        }
        self.inner.notify();
    }

    /// Submit a new bookmark.
    ///
    /// The view is not touched here; the bookmark appears when the
    /// provider's insert event arrives.
    pub async fn add(&self, url: &str, title: Option<&str>) -> SyncResult<()> {
        let parsed = validate_url(url)?;
        let title = resolve_title(&parsed, title)?;
        let owner = self
            .inner
            .lock()
            .view
            .identity
            .as_ref()
            .map(|i| i.id.clone())
            .ok_or(SyncError::Unauthenticated)?;

        self.store.insert(&owner, &title, url.trim()).await?;
        info!(user = %owner, title = %title, "bookmark submitted");
        Ok(())
    }

    /// Delete a bookmark that is currently in view.
    ///
    /// The id is flagged as deleting while the call runs. On success the
    /// entry and its flag go away when the delete event arrives; on
    /// failure the flag is cleared and the entry stays.
    pub async fn remove(&self, id: &BookmarkId) -> SyncResult<()> {
        let epoch = {
            let mut state = self.inner.lock();
            if state.view.identity.is_none() {
                return Err(SyncError::Unauthenticated);
            }
            if !state.view.snapshot.contains(id) {
                return Err(SyncError::Validation(format!("bookmark {} is not in view", id)));
            }
            if !state.view.deleting.insert(id.clone()) {
                debug!(id = %id, "delete already in flight");
                return Ok(());
            }
            state.epoch
        };
        self.inner.notify();

        match self.store.delete(id).await {
            Ok(()) => {
                debug!(id = %id, "delete accepted, waiting for change feed");
                Ok(())
            }
            Err(e) => {
                warn!(id = %id, error = %e, "delete failed");
                let cleared = {
                    let mut state = self.inner.lock();
                    state.epoch == epoch && state.view.deleting.remove(id)
                };
                if cleared {
                    self.inner.notify();
                }
                Err(e.into())
            }
        }
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn teardown(&self) {
        let previous = self.session_slot().take();
        drop(previous);
    }
}
