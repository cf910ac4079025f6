//! Input checks for mutation intents and the errors intents report

use crate::backend::BackendError;
use thiserror::Error;
use url::Url;

/// Why an intent did not go through
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Input rejected locally; the backend was never called
    #[error("{0}")]
    Validation(String),

    /// No signed-in identity; the backend was never called
    #[error("You must be logged in to manage bookmarks")]
    Unauthenticated,

    /// The provider failed; carries its message verbatim
    #[error("{0}")]
    Backend(String),
}

impl From<BackendError> for SyncError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Result type for view model intents
pub type SyncResult<T> = Result<T, SyncError>;

/// Parse user input as an absolute URL
pub fn validate_url(input: &str) -> SyncResult<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation("URL is required".to_string()));
    }
    Url::parse(trimmed).map_err(|_| SyncError::Validation("Please enter a valid URL".to_string()))
}

/// The title to store: the trimmed title if non-empty, else the URL's host
pub fn resolve_title(url: &Url, title: Option<&str>) -> SyncResult<String> {
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        return Ok(title.to_string());
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(host.to_string()),
        _ => Err(SyncError::Validation(
            "A title is required for URLs without a host".to_string(),
        )),
    }
}
