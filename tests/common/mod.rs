//! Shared test doubles
//!
//! `ScriptedBackend` records every call and never echoes writes on its own:
//! tests push change payloads explicitly, which lets them observe the view
//! between a mutation and its echo.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use linkshelf::backend::ChangeSink;
use linkshelf::{
    Backend, BackendError, BackendResult, Bookmark, BookmarkId, Identity, IdentityId,
    NewBookmark, RawChange, SignIn, SubscriptionId, SyncViewModel, ViewState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List(IdentityId),
    Insert(NewBookmark),
    Delete(BookmarkId),
    Subscribe(IdentityId),
    Unsubscribe(SubscriptionId),
}

pub struct ScriptedBackend {
    identity: watch::Sender<Option<Identity>>,
    rows: Mutex<Vec<Bookmark>>,
    sinks: Mutex<HashMap<SubscriptionId, (IdentityId, ChangeSink)>>,
    calls: Mutex<Vec<Call>>,
    insert_failure: Mutex<Option<String>>,
    delete_failure: Mutex<Option<String>>,
    list_failure: Mutex<Option<String>>,
    subscribe_failure: Mutex<Option<String>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    next_subscription: AtomicU64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            identity,
            rows: Mutex::new(Vec::new()),
            sinks: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            insert_failure: Mutex::new(None),
            delete_failure: Mutex::new(None),
            list_failure: Mutex::new(None),
            subscribe_failure: Mutex::new(None),
            list_gate: Mutex::new(None),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn signed_in(user: &str) -> Self {
        let backend = Self::new();
        backend.identity.send_replace(Some(Identity::new(user)));
        backend
    }

    /// Rows returned by `list_owned`, newest first
    pub fn seed(&self, rows: Vec<Bookmark>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn fail_inserts_with(&self, message: &str) {
        *self.insert_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_deletes_with(&self, message: &str) {
        *self.delete_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_lists_with(&self, message: &str) {
        *self.list_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Fail only the next `subscribe`; later ones succeed
    pub fn fail_next_subscribe_with(&self, message: &str) {
        *self.subscribe_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Make the next `list_owned` wait until the returned handle is notified
    pub fn hold_next_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Deliver a raw payload to every subscriber of `owner`
    pub fn push(&self, owner: &str, change: RawChange) {
        let owner = IdentityId::from(owner);
        for (sub_owner, sink) in self.sinks.lock().unwrap().values() {
            if sub_owner == &owner {
                let _ = sink.send(change.clone());
            }
        }
    }

    pub fn push_insert(&self, row: &Bookmark) {
        self.push(row.owner.as_str(), RawChange::insert(row).unwrap());
    }

    pub fn push_update(&self, row: &Bookmark) {
        self.push(row.owner.as_str(), RawChange::update(row).unwrap());
    }

    pub fn push_delete(&self, owner: &str, id: &str) {
        self.push(owner, RawChange::delete(&BookmarkId::from(id)));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inserts(&self) -> Vec<NewBookmark> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Insert(b) => Some(b),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<BookmarkId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn current_identity(&self) -> BackendResult<Option<Identity>> {
        Ok(self.identity.borrow().clone())
    }

    fn identity_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    async fn sign_in(&self, request: SignIn) -> BackendResult<Identity> {
        let identity = request.into_identity();
        self.identity.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.identity.send_replace(None);
        Ok(())
    }

    async fn list_owned(&self, owner: &IdentityId) -> BackendResult<Vec<Bookmark>> {
        self.record(Call::List(owner.clone()));
        let gate = self.list_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(message) = self.list_failure.lock().unwrap().clone() {
            return Err(BackendError::Unavailable(message));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| &b.owner == owner)
            .cloned()
            .collect())
    }

    async fn insert(&self, bookmark: NewBookmark) -> BackendResult<()> {
        self.record(Call::Insert(bookmark));
        match self.insert_failure.lock().unwrap().clone() {
            Some(message) => Err(BackendError::Rejected(message)),
            None => Ok(()),
        }
    }

    async fn delete_by_id(&self, id: &BookmarkId) -> BackendResult<()> {
        self.record(Call::Delete(id.clone()));
        match self.delete_failure.lock().unwrap().clone() {
            Some(message) => Err(BackendError::Rejected(message)),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, owner: &IdentityId, sink: ChangeSink) -> BackendResult<SubscriptionId> {
        self.record(Call::Subscribe(owner.clone()));
        if let Some(message) = self.subscribe_failure.lock().unwrap().take() {
            return Err(BackendError::Unavailable(message));
        }
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.sinks.lock().unwrap().insert(id, (owner.clone(), sink));
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.record(Call::Unsubscribe(subscription));
        self.sinks.lock().unwrap().remove(&subscription);
    }
}

/// A row owned by `owner`, created `minute` minutes past noon
pub fn bookmark(owner: &str, id: &str, minute: u32) -> Bookmark {
    Bookmark {
        id: BookmarkId::from(id),
        owner: IdentityId::from(owner),
        title: format!("Bookmark {}", id),
        url: format!("https://{}.example.com/", id),
        created_at: at(minute),
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 2, 12, minute, 0).unwrap()
}

/// Wait (bounded) until the view satisfies `predicate`
pub async fn settle<F>(vm: &SyncViewModel, predicate: F) -> ViewState
where
    F: Fn(&ViewState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), vm.wait_until(predicate))
        .await
        .expect("view did not reach the expected state")
}

/// Yield until `condition` holds, bounded
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition never held");
}
