//! SQLite backend
//!
//! Bookmarks, the signed-in session, and a change log share one database
//! file. Every mutation appends its change payload to `changes` in the
//! same transaction; each subscription tails that log from the sequence
//! number current at subscribe time. Several processes opening the same
//! file therefore see each other's changes. Log entries older than the
//! retention window are pruned on every mutation.

use super::payload::RawChange;
use super::traits::{
    Backend, BackendError, BackendResult, ChangeSink, OpenBackend, SubscriptionId,
};
use crate::model::{Bookmark, BookmarkId, Identity, IdentityId, NewBookmark, SignIn};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often a subscription polls the change log unless configured otherwise
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long change log entries are kept for tails that fall behind
pub const DEFAULT_CHANGE_RETENTION: Duration = Duration::from_secs(60 * 60);

struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    fn init_schema(conn: &Connection) -> BackendResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS bookmarks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL CHECK (length(title) > 0),
                url TEXT NOT NULL CHECK (length(url) > 0),
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bookmarks_owner
                ON bookmarks(user_id, created_at);

            -- Change log tailed by subscriptions; seq is never reused
            CREATE TABLE IF NOT EXISTS changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_changes_owner
                ON changes(user_id, seq);

            CREATE INDEX IF NOT EXISTS idx_changes_recorded
                ON changes(recorded_at);

            -- At most one signed-in identity per database
            CREATE TABLE IF NOT EXISTS session (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                identity_json TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    }

    fn conn(&self) -> BackendResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BackendError::Unavailable("database connection poisoned".to_string()))
    }

    fn load_session(&self) -> BackendResult<Option<Identity>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row("SELECT identity_json FROM session WHERE slot = 0", [], |row| row.get(0))
            .optional()?;
        Ok(match json {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        })
    }

    fn save_session(&self, identity: Option<&Identity>) -> BackendResult<()> {
        let conn = self.conn()?;
        match identity {
            Some(identity) => {
                conn.execute(
                    "INSERT INTO session (slot, identity_json) VALUES (0, ?1)
                     ON CONFLICT(slot) DO UPDATE SET identity_json = excluded.identity_json",
                    params![serde_json::to_string(identity)?],
                )?;
            }
            None => {
                conn.execute("DELETE FROM session", [])?;
            }
        }
        Ok(())
    }

    fn list(&self, owner: &IdentityId) -> BackendResult<Vec<Bookmark>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, url, created_at FROM bookmarks
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![owner.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut bookmarks = Vec::new();
        for row in rows {
            let (id, user_id, title, url, created_at) = row?;
            bookmarks.push(Bookmark {
                id: BookmarkId::from_string(id),
                owner: IdentityId::from_string(user_id),
                title,
                url,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(bookmarks)
    }

    fn insert(&self, bookmark: NewBookmark) -> BackendResult<Bookmark> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let latest: Option<String> =
            tx.query_row("SELECT MAX(created_at) FROM bookmarks", [], |row| row.get(0))?;
        let now = Utc::now();
        let created_at = match latest.as_deref().map(parse_timestamp).transpose()? {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        };

        let row = bookmark.into_bookmark(BookmarkId::new(), created_at);
        tx.execute(
            "INSERT INTO bookmarks (id, user_id, title, url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                row.id.as_str(),
                row.owner.as_str(),
                row.title,
                row.url,
                format_timestamp(&row.created_at),
            ],
        )?;
        append_change(&tx, &row.owner, &RawChange::insert(&row)?)?;
        tx.commit()?;
        Ok(row)
    }

    /// Delete `id` if `caller` owns it. Returns false when nothing matched.
    fn delete(&self, caller: &IdentityId, id: &BookmarkId) -> BackendResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM bookmarks WHERE id = ?1 AND user_id = ?2",
            params![id.as_str(), caller.as_str()],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        append_change(&tx, caller, &RawChange::delete(id))?;
        tx.commit()?;
        Ok(true)
    }

    fn last_change(&self) -> BackendResult<i64> {
        let conn = self.conn()?;
        let seq: Option<i64> = conn.query_row("SELECT MAX(seq) FROM changes", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0))
    }

    fn changes_since(&self, owner: &IdentityId, cursor: i64) -> BackendResult<Vec<(i64, RawChange)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, payload FROM changes WHERE user_id = ?1 AND seq > ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![owner.as_str(), cursor], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut changes = Vec::new();
        for row in rows {
            let (seq, payload) = row?;
            changes.push((seq, RawChange(serde_json::from_str(&payload)?)));
        }
        Ok(changes)
    }

    /// Drop log entries recorded before `cutoff`. Returns how many went.
    fn prune_changes(&self, cutoff: DateTime<Utc>) -> BackendResult<usize> {
        let conn = self.conn()?;
        let pruned = conn.execute(
            "DELETE FROM changes WHERE recorded_at < ?1",
            params![format_timestamp(&cutoff)],
        )?;
        Ok(pruned)
    }
}

fn append_change(conn: &Connection, owner: &IdentityId, change: &RawChange) -> BackendResult<()> {
    conn.execute(
        "INSERT INTO changes (user_id, payload, recorded_at) VALUES (?1, ?2, ?3)",
        params![
            owner.as_str(),
            serde_json::to_string(change)?,
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 so lexical order in SQL matches time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> BackendResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| BackendError::DateParse(e.to_string()))
}

/// SQLite-backed capability provider
pub struct SqliteBackend {
    db: Arc<Database>,
    identity: watch::Sender<Option<Identity>>,
    tails: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    next_subscription: AtomicU64,
    poll_interval: Duration,
    retention: Duration,
}

impl SqliteBackend {
    fn from_connection(conn: Connection) -> BackendResult<Self> {
        Database::init_schema(&conn)?;
        let db = Arc::new(Database {
            conn: Mutex::new(conn),
        });
        let (identity, _) = watch::channel(db.load_session()?);
        Ok(Self {
            db,
            identity,
            tails: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            retention: DEFAULT_CHANGE_RETENTION,
        })
    }

    /// Set how often subscriptions poll the change log
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set how long change log entries are kept
    pub fn with_change_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Number of live subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.tails().map(|tails| tails.len()).unwrap_or(0)
    }

    fn tails(&self) -> BackendResult<MutexGuard<'_, HashMap<SubscriptionId, JoinHandle<()>>>> {
        self.tails
            .lock()
            .map_err(|_| BackendError::Unavailable("subscription registry poisoned".to_string()))
    }

    /// The session as stored on disk. Another process may have changed it,
    /// so local watchers are brought up to date on every read.
    fn session(&self) -> BackendResult<Option<Identity>> {
        let stored = self.db.load_session()?;
        self.identity.send_if_modified(|current| {
            if *current != stored {
                *current = stored.clone();
                true
            } else {
                false
            }
        });
        Ok(stored)
    }

    fn prune(&self) {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let Some(cutoff) = cutoff else {
            return;
        };
        match self.db.prune_changes(cutoff) {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "pruned change log"),
            Err(e) => warn!(error = %e, "failed to prune change log"),
        }
    }

    fn require_identity(&self) -> BackendResult<Identity> {
        self.session()?
            .ok_or_else(|| BackendError::Rejected("not signed in".to_string()))
    }
}

impl OpenBackend for SqliteBackend {
    fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> BackendResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl Drop for SqliteBackend {
    fn drop(&mut self) {
        if let Ok(mut tails) = self.tails.lock() {
            for (_, handle) in tails.drain() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn current_identity(&self) -> BackendResult<Option<Identity>> {
        self.session()
    }

    fn identity_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    async fn sign_in(&self, request: SignIn) -> BackendResult<Identity> {
        let identity = request.into_identity();
        self.db.save_session(Some(&identity))?;
        info!(user = %identity.id, "signed in");
        self.identity.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.db.save_session(None)?;
        if let Some(previous) = self.identity.send_replace(None) {
            info!(user = %previous.id, "signed out");
        }
        Ok(())
    }

    async fn list_owned(&self, owner: &IdentityId) -> BackendResult<Vec<Bookmark>> {
        match self.session()? {
            Some(caller) if &caller.id == owner => self.db.list(owner),
            _ => Ok(Vec::new()),
        }
    }

    async fn insert(&self, bookmark: NewBookmark) -> BackendResult<()> {
        let caller = self.require_identity()?;
        if caller.id != bookmark.owner {
            return Err(BackendError::Rejected(
                "new row violates row-level security policy for table \"bookmarks\"".to_string(),
            ));
        }
        let row = self.db.insert(bookmark)?;
        debug!(id = %row.id, owner = %row.owner, "inserted bookmark");
        self.prune();
        Ok(())
    }

    async fn delete_by_id(&self, id: &BookmarkId) -> BackendResult<()> {
        let caller = self.require_identity()?;
        if self.db.delete(&caller.id, id)? {
            debug!(id = %id, "deleted bookmark");
            self.prune();
            Ok(())
        } else {
            Err(BackendError::Rejected(format!(
                "bookmark {} not found for current user",
                id
            )))
        }
    }

    async fn subscribe(&self, owner: &IdentityId, sink: ChangeSink) -> BackendResult<SubscriptionId> {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let mut cursor = self.db.last_change()?;
        let db = Arc::clone(&self.db);
        let owner = owner.clone();
        let interval = self.poll_interval;

        debug!(subscription = %id, owner = %owner, cursor, "subscribed");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // The read may wait on busy_timeout behind another writer.
                let read = {
                    let db = Arc::clone(&db);
                    let owner = owner.clone();
                    tokio::task::spawn_blocking(move || db.changes_since(&owner, cursor)).await
                };
                let batch = match read {
                    Ok(Ok(batch)) => batch,
                    Ok(Err(e)) => {
                        warn!(subscription = %id, error = %e, "failed to read change log");
                        continue;
                    }
                    Err(e) => {
                        warn!(subscription = %id, error = %e, "change log read task failed");
                        continue;
                    }
                };
                for (seq, change) in batch {
                    cursor = seq;
                    if sink.send(change).is_err() {
                        debug!(subscription = %id, "sink closed, stopping tail");
                        return;
                    }
                }
            }
        });
        self.tails()?.insert(id, handle);
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Ok(mut tails) = self.tails() {
            if let Some(handle) = tails.remove(&subscription) {
                handle.abort();
                debug!(subscription = %subscription, "unsubscribed");
            }
        }
    }
}
