//! Resolution of content ids to playable local files.
//!
//! The coordinator hides whether a path came from the disk cache, from a
//! download already in progress, or from a fresh download.

pub mod coordinator;
mod in_flight;

pub use coordinator::{FetchCoordinator, FetchStats};

use crate::content::{ContentId, MediaKind};
use crate::storage::CacheError;

/// Terminal failure of a fetch, shared by every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Backend could not produce a URL for the content
    #[error("Could not resolve remote URL for {content_id}: {reason}")]
    RemoteResolutionFailed { content_id: ContentId, reason: String },

    /// Transport error, non-success response or short body
    #[error("Download of {content_id} failed: {reason}")]
    DownloadFailed { content_id: ContentId, reason: String },

    /// Origin served something other than the expected media kind
    #[error("Content {content_id} declared as {declared}, expected {expected}")]
    InvalidContentKind {
        content_id: ContentId,
        expected: MediaKind,
        declared: String,
    },

    /// Staging or publishing the file failed
    #[error("Cache I/O for {content_id} failed: {reason}")]
    IoFailure { content_id: ContentId, reason: String },
}

impl FetchError {
    pub fn content_id(&self) -> &ContentId {
        match self {
            FetchError::RemoteResolutionFailed { content_id, .. }
            | FetchError::DownloadFailed { content_id, .. }
            | FetchError::InvalidContentKind { content_id, .. }
            | FetchError::IoFailure { content_id, .. } => content_id,
        }
    }

    /// Whether trying again can plausibly succeed. An origin serving the
    /// wrong media kind will keep doing so.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::InvalidContentKind { .. })
    }

    pub(crate) fn from_cache(content_id: &ContentId, error: CacheError) -> Self {
        match error {
            CacheError::InvalidContentKind {
                content_id,
                expected,
                declared,
            } => FetchError::InvalidContentKind {
                content_id,
                expected,
                declared,
            },
            other => FetchError::IoFailure {
                content_id: content_id.clone(),
                reason: other.to_string(),
            },
        }
    }
}
