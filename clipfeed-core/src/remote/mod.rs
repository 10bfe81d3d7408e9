//! External collaborators consumed by the acquisition engine.
//!
//! The backend that maps content ids to media URLs, the transport that
//! downloads them, the feed listing service and the login session are all
//! reached through these traits so the core can run against real services,
//! local files or test doubles.

pub mod http;
pub mod json_feed;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use url::Url;

pub use http::{HttpTransport, TemplateResolver};
pub use json_feed::JsonFeedSource;

use crate::content::{ContentId, FeedItem, UserId};

/// Errors from the metadata/storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("No remote object for {content_id}")]
    NotFound { content_id: ContentId },

    #[error("Backend request failed: {reason}")]
    Backend { reason: String },

    #[error("Invalid remote URL: {reason}")]
    InvalidUrl { reason: String },
}

/// Errors from the media transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("Body of {url} failed mid-stream: {reason}")]
    Body { url: String, reason: String },
}

/// Chunked response body.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response of a media download: declared type plus the streamed body.
pub struct MediaDownload {
    /// Content type declared by the origin, e.g. `video/mp4`
    pub content_type: Option<String>,
    /// Advertised body length, if any
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl MediaDownload {
    /// Wraps an in-memory payload as a single-chunk download.
    pub fn from_bytes(bytes: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        let bytes = bytes.into();
        Self {
            content_type: content_type.map(str::to_string),
            content_length: Some(bytes.len() as u64),
            body: stream::once(async move { Ok(bytes) }).boxed(),
        }
    }
}

impl fmt::Debug for MediaDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDownload")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Resolves a content id to a signed or direct media URL.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    /// # Errors
    ///
    /// - `RemoteError::NotFound` - Backend has no object for the id
    /// - `RemoteError::Backend` - Backend call failed
    /// - `RemoteError::InvalidUrl` - Backend returned something that is not a URL
    async fn resolve_remote_url(&self, content_id: &ContentId) -> Result<Url, RemoteError>;
}

/// Downloads media bytes.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Starts a download; the body is consumed by the caller.
    ///
    /// # Errors
    ///
    /// - `TransportError::Request` - Connection or request failure
    /// - `TransportError::Status` - Non-success response
    async fn download(&self, url: &Url) -> Result<MediaDownload, TransportError>;
}

/// Lists the feed records of a user.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// # Errors
    ///
    /// - `RemoteError::Backend` - Listing failed
    async fn list_feed_items(&self, user_id: &UserId) -> Result<Vec<FeedItem>, RemoteError>;
}

/// Current login state.
pub trait AuthSession: Send + Sync {
    /// The logged-in user, or `None` when logged out.
    fn current_user(&self) -> Option<UserId>;
}

/// Session with a fixed login state.
#[derive(Debug, Clone, Default)]
pub struct StaticSession {
    user: Option<UserId>,
}

impl StaticSession {
    pub fn logged_in(user: UserId) -> Self {
        Self { user: Some(user) }
    }

    pub fn logged_out() -> Self {
        Self { user: None }
    }
}

impl AuthSession for StaticSession {
    fn current_user(&self) -> Option<UserId> {
        self.user.clone()
    }
}
