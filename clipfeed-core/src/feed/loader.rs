//! Populates a feed from the backend listing for the logged-in user.

use tracing::{debug, info};

use super::FeedError;
use crate::content::FeedItem;
use crate::remote::{AuthSession, FeedSource};

/// Lists the feed items owned by the currently logged-in user.
///
/// # Errors
///
/// - `FeedError::NotLoggedIn` - No user session is active
/// - `FeedError::Listing` - Backend listing failed
pub async fn load_user_feed(
    auth: &dyn AuthSession,
    source: &dyn FeedSource,
) -> Result<Vec<FeedItem>, FeedError> {
    let user_id = auth.current_user().ok_or(FeedError::NotLoggedIn)?;
    debug!("Listing feed items for {}", user_id);

    let items = source
        .list_feed_items(&user_id)
        .await
        .map_err(|e| FeedError::Listing {
            user_id: user_id.to_string(),
            reason: e.to_string(),
        })?;

    info!("Loaded {} feed items for {}", items.len(), user_id);
    Ok(items)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_test::assert_ok;

    use super::*;
    use crate::content::{ContentId, UserId};
    use crate::remote::{RemoteError, StaticSession};

    struct FixedSource {
        fail: bool,
    }

    #[async_trait]
    impl FeedSource for FixedSource {
        async fn list_feed_items(&self, user_id: &UserId) -> Result<Vec<FeedItem>, RemoteError> {
            if self.fail {
                return Err(RemoteError::Backend {
                    reason: "listing unavailable".into(),
                });
            }
            Ok(vec![FeedItem::new(
                "post-1",
                ContentId::new("clip-1").unwrap(),
                user_id.clone(),
                "first",
            )])
        }
    }

    #[tokio::test]
    async fn test_logged_in_user_gets_own_items() {
        let auth = StaticSession::logged_in(UserId::new("alice"));
        let items = assert_ok!(load_user_feed(&auth, &FixedSource { fail: false }).await);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].owner_id, UserId::new("alice"));
    }

    #[tokio::test]
    async fn test_logged_out_is_rejected_before_listing() {
        let auth = StaticSession::logged_out();
        let result = load_user_feed(&auth, &FixedSource { fail: true }).await;

        assert!(matches!(result, Err(FeedError::NotLoggedIn)));
    }

    #[tokio::test]
    async fn test_listing_failure_names_user() {
        let auth = StaticSession::logged_in(UserId::new("bob"));
        let result = load_user_feed(&auth, &FixedSource { fail: true }).await;

        match result {
            Err(FeedError::Listing { user_id, .. }) => assert_eq!(user_id, "bob"),
            other => panic!("expected listing error, got {other:?}"),
        }
    }
}
