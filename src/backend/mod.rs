//! Backend capability providers
//!
//! Everything the client needs from the hosted service sits behind the
//! `Backend` trait: identity, owner-scoped record operations, and a
//! change feed. `MemoryBackend` keeps state in-process; `SqliteBackend`
//! persists to a database file and feeds subscribers from a change log.

mod memory;
mod payload;
mod sqlite;
mod traits;

pub use memory::MemoryBackend;
pub use payload::{ChangeKind, RawChange};
pub use sqlite::SqliteBackend;
pub use traits::{Backend, BackendError, BackendResult, ChangeSink, OpenBackend, SubscriptionId};
