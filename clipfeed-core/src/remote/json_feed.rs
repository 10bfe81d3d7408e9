//! Feed listing backed by a JSON file.
//!
//! The file holds an array of feed items for any number of owners; listing
//! returns one owner's items, newest first.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{FeedSource, RemoteError};
use crate::content::{FeedItem, UserId};

#[derive(Debug, Clone)]
pub struct JsonFeedSource {
    path: PathBuf,
}

impl JsonFeedSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl FeedSource for JsonFeedSource {
    async fn list_feed_items(&self, user_id: &UserId) -> Result<Vec<FeedItem>, RemoteError> {
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|e| RemoteError::Backend {
                reason: format!("reading {}: {e}", self.path.display()),
            })?;

        let items: Vec<FeedItem> =
            serde_json::from_slice(&raw).map_err(|e| RemoteError::Backend {
                reason: format!("parsing {}: {e}", self.path.display()),
            })?;

        let mut owned: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| &item.owner_id == user_id)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(owned)
    }
}
