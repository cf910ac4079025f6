//! linkshelf: personal bookmarks, kept in sync across every open view
//!
//! A thin client over a backend capability provider (identity, owner-scoped
//! storage, change feed).
//!
//! # Core Concepts
//!
//! - **Backend**: the capability trait; `MemoryBackend` and `SqliteBackend`
//!   implement it
//! - **BookmarkStore**: stateless adapter that turns raw change payloads
//!   into typed `ChangeEvent`s
//! - **SyncViewModel**: owns one identity's newest-first snapshot, applies
//!   the change feed in order, and exposes the `add`/`remove` intents
//!
//! # Example
//!
//! ```
//! use linkshelf::{Identity, MemoryBackend, SyncViewModel};
//! use std::sync::Arc;
//!
//! # block_on(async {
//! let backend = Arc::new(MemoryBackend::with_identity(Identity::new("ada")));
//! let view_model = SyncViewModel::from_backend(backend);
//! view_model.start().await.unwrap();
//! view_model.add("https://example.com", None).await.unwrap();
//! let view = view_model.wait_until(|v| !v.snapshot.is_empty()).await;
//! assert_eq!(view.bookmarks()[0].title, "example.com");
//! # });
//! # fn block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod backend;
pub mod config;
mod model;
pub mod present;
pub mod store;
pub mod sync;

pub use backend::{
    Backend, BackendError, BackendResult, ChangeKind, MemoryBackend, OpenBackend, RawChange,
    SqliteBackend, SubscriptionId,
};
pub use config::{Config, ConfigError};
pub use model::{Bookmark, BookmarkId, Identity, IdentityId, IdentityMetadata, NewBookmark, SignIn};
pub use store::{BookmarkStore, ChangeEvent, Feed, FeedError};
pub use sync::{Phase, Snapshot, SyncError, SyncResult, SyncViewModel, ViewState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
