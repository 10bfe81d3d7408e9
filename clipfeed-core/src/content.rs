//! Typed identifiers and feed data.
//!
//! Content identifiers double as cache keys, so their on-disk naming lives
//! here as well: a cache file stem is the lowercase hex of the identifier
//! bytes, which keeps names filesystem-safe and lets the cache index be
//! rebuilt from a directory scan.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest accepted identifier in bytes. Hex doubles the length and common
/// filesystems cap names at 255 bytes, leaving room for the extension.
pub const MAX_CONTENT_ID_LEN: usize = 120;

/// Errors produced when constructing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentIdError {
    #[error("Content id must not be empty")]
    Empty,

    #[error("Content id is {len} bytes, limit is {MAX_CONTENT_ID_LEN}")]
    TooLong { len: usize },

    #[error("Invalid cache file stem: {stem}")]
    InvalidFileStem { stem: String },
}

/// Opaque identifier of a remote media object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Creates a content id after validating its length.
    ///
    /// # Errors
    ///
    /// - `ContentIdError::Empty` - Identifier is empty
    /// - `ContentIdError::TooLong` - Identifier exceeds `MAX_CONTENT_ID_LEN`
    pub fn new(raw: impl Into<String>) -> Result<Self, ContentIdError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ContentIdError::Empty);
        }
        if raw.len() > MAX_CONTENT_ID_LEN {
            return Err(ContentIdError::TooLong { len: raw.len() });
        }
        Ok(Self(raw))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic cache file stem for this identifier.
    pub fn file_stem(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Recovers the identifier from a cache file stem.
    ///
    /// # Errors
    ///
    /// - `ContentIdError::InvalidFileStem` - Stem is not hex of a UTF-8 identifier
    pub fn from_file_stem(stem: &str) -> Result<Self, ContentIdError> {
        let invalid = || ContentIdError::InvalidFileStem {
            stem: stem.to_string(),
        };
        // Uppercase hex decodes too, but would never be written by us.
        if stem.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(invalid());
        }
        let bytes = hex::decode(stem).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        Self::new(raw).map_err(|_| invalid())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentId {
    type Error = ContentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}

/// Kind of media a cache directory holds.
///
/// Each kind has one fixed file extension and one top-level MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    /// Fixed extension of cache files holding this kind.
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Video => "mp4",
            MediaKind::Image => "jpg",
            MediaKind::Audio => "m4a",
        }
    }

    /// Top-level MIME type, e.g. `video` for `video/mp4`.
    pub fn mime_top_level(self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }

    /// Checks a transport-declared content type against this kind.
    ///
    /// Parameters such as `; charset=` are ignored. Generic binary payloads
    /// (`application/octet-stream`) are accepted since object stores often
    /// serve uploads that way; a missing declaration is rejected.
    pub fn accepts(self, declared: Option<&str>) -> bool {
        let Some(declared) = declared else {
            return false;
        };
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/octet-stream" {
            return true;
        }

        match essence.split_once('/') {
            Some((top, sub)) => top == self.mime_top_level() && !sub.is_empty(),
            None => false,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_top_level())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "image" => Ok(MediaKind::Image),
            "audio" => Ok(MediaKind::Audio),
            _ => Err(format!("Invalid media kind: {s}")),
        }
    }
}

/// Identifier of a feed record (distinct from the media it points to).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedItemId(String);

impl FeedItemId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One record of a user's feed.
///
/// Immutable once loaded; its ordinal position is its index in the feed list
/// held by the feed resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: FeedItemId,
    pub content_id: ContentId,
    pub owner_id: UserId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl FeedItem {
    pub fn new(
        id: impl Into<String>,
        content_id: ContentId,
        owner_id: UserId,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: FeedItemId::new(id),
            content_id,
            owner_id,
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}
