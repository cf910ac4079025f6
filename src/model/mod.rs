//! Core data types: bookmarks and the identities that own them

mod bookmark;
mod identity;

pub use bookmark::{Bookmark, BookmarkId, NewBookmark};
pub use identity::{Identity, IdentityId, IdentityMetadata, SignIn};
