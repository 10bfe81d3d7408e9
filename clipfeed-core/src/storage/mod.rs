//! Storage layer for downloaded media.
//!
//! Maps content ids to complete local files that survive restarts. Writers
//! stage payloads and publish them atomically; readers only ever see
//! complete files.

pub mod disk_cache;
pub mod eviction;
pub mod keyed_lock;

use std::path::{Path, PathBuf};

pub use disk_cache::{CacheEntry, CacheStats, DiskCache, StagedPayload, StagingFile};
pub use eviction::{EvictionPolicy, SizeBoundedLru, UnboundedRetention, policy_from_config};
pub use keyed_lock::KeyedLocks;

use crate::content::{ContentId, MediaKind};

/// Errors that occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Payload's declared content type does not match the expected media kind
    #[error("Content {content_id} declared as {declared}, expected {expected}")]
    InvalidContentKind {
        /// Content being published
        content_id: ContentId,
        /// Media kind the cache was asked to store
        expected: MediaKind,
        /// Content type declared by the transport
        declared: String,
    },

    /// File system operation failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// No usable entry exists for the content id
    #[error("No cache entry for {content_id}")]
    Miss {
        /// Content that was looked up
        content_id: ContentId,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
