//! Feed-level decisions about what to fetch and when.

pub mod loader;
pub mod manager;

pub use loader::load_user_feed;
pub use manager::{
    FeedResourceManager, ItemLoadState, ResolutionEvent, ResolutionUpdate, ResolvePurpose,
    plan_visibility,
};

/// Errors raised while populating a feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("No user is logged in")]
    NotLoggedIn,

    #[error("Listing feed for {user_id} failed: {reason}")]
    Listing { user_id: String, reason: String },
}
