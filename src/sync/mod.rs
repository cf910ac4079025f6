//! Real-time synchronized bookmark view
//!
//! `SyncViewModel` owns the session's snapshot, reconciles it against the
//! bulk read and the change feed, and exposes the `add`/`remove` intents.

mod intent;
mod snapshot;
mod view_model;

pub use intent::{resolve_title, validate_url, SyncError, SyncResult};
pub use snapshot::{Applied, Snapshot};
pub use view_model::{Phase, SyncViewModel, ViewState};
