//! Clipfeed Core - Feed video acquisition, caching and playback lifecycle
//!
//! This crate turns content ids from a feed into playable local files: a
//! durable disk cache with atomic publish, a single-flight fetch
//! coordinator, visibility-driven prefetching, and a player registry that
//! keeps at most one item playing and releases every player it drops.

pub mod config;
pub mod content;
pub mod feed;
pub mod fetch;
pub mod player;
pub mod remote;
pub mod session;
pub mod storage;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

// Re-export main types for convenient access
pub use config::ClipfeedConfig;
pub use content::{ContentId, ContentIdError, FeedItem, FeedItemId, MediaKind, UserId};
pub use feed::FeedError;
pub use fetch::{FetchCoordinator, FetchError};
pub use player::PlayerError;
pub use remote::{RemoteError, TransportError};
pub use session::{FeedSessionHandle, SessionError, spawn_feed_session};
pub use storage::{CacheError, DiskCache};

/// Errors that can bubble up from any Clipfeed subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ClipfeedError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Player error: {0}")]
    Player(#[from] PlayerError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Invalid content id: {0}")]
    ContentId(#[from] ContentIdError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl ClipfeedError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ClipfeedError::Fetch(e) => match e {
                FetchError::RemoteResolutionFailed { content_id, .. } => {
                    format!("Could not find media for {content_id}")
                }
                FetchError::DownloadFailed { .. } => {
                    "Failed to load video. Tap to retry".to_string()
                }
                FetchError::InvalidContentKind { .. } => {
                    "This post does not contain a playable video".to_string()
                }
                FetchError::IoFailure { .. } => "Could not save video to disk".to_string(),
            },
            ClipfeedError::Cache(_) => "Storage error occurred".to_string(),
            ClipfeedError::Remote(_) | ClipfeedError::Transport(_) => {
                "Network error occurred".to_string()
            }
            ClipfeedError::Feed(FeedError::NotLoggedIn) => "Please log in first".to_string(),
            ClipfeedError::Feed(_) => "Could not load your feed".to_string(),
            ClipfeedError::Player(_) => "Video could not be played".to_string(),
            ClipfeedError::Session(_) => "Feed is no longer active".to_string(),
            ClipfeedError::ContentId(e) => format!("Invalid content id: {e}"),
            ClipfeedError::Configuration { .. } => "Configuration error occurred".to_string(),
        }
    }

    /// Checks if repeating the operation can plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClipfeedError::Fetch(e) => e.is_retryable(),
            ClipfeedError::Remote(_)
            | ClipfeedError::Transport(_)
            | ClipfeedError::Cache(_)
            | ClipfeedError::Player(_) => true,
            ClipfeedError::Feed(FeedError::Listing { .. }) => true,
            ClipfeedError::Feed(FeedError::NotLoggedIn)
            | ClipfeedError::Session(_)
            | ClipfeedError::ContentId(_)
            | ClipfeedError::Configuration { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClipfeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_and_retry_hints() {
        let content_id = ContentId::new("abc").unwrap();

        let failed: ClipfeedError = FetchError::DownloadFailed {
            content_id: content_id.clone(),
            reason: "reset".into(),
        }
        .into();
        assert!(failed.is_retryable());
        assert!(failed.user_message().contains("retry"));

        let wrong_kind: ClipfeedError = FetchError::InvalidContentKind {
            content_id,
            expected: MediaKind::Video,
            declared: "text/html".into(),
        }
        .into();
        assert!(!wrong_kind.is_retryable());

        let logged_out: ClipfeedError = FeedError::NotLoggedIn.into();
        assert_eq!(logged_out.user_message(), "Please log in first");
        assert!(!logged_out.is_retryable());
    }
}
