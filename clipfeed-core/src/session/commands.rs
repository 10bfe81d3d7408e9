//! Command and event definitions for the feed session actor.

use std::path::PathBuf;

use tokio::sync::oneshot;

use super::SessionError;
use crate::content::{ContentId, FeedItem, FeedItemId};
use crate::feed::ItemLoadState;
use crate::player::BindingState;

/// Commands that can be sent to the feed session actor.
///
/// Each command carries a responder the actor answers on once the command
/// has been applied.
pub enum SessionCommand {
    /// Replace the feed list wholesale (pull to refresh).
    ReplaceFeed {
        items: Vec<FeedItem>,
        responder: oneshot::Sender<()>,
    },
    /// Append a page of items; answers with the new feed length.
    AppendFeed {
        items: Vec<FeedItem>,
        responder: oneshot::Sender<usize>,
    },
    /// The item at `index` became the visible one.
    SetVisible {
        index: usize,
        responder: oneshot::Sender<Result<FeedItemId, SessionError>>,
    },
    /// App moved to the background.
    Suspend { responder: oneshot::Sender<()> },
    /// App returned to the foreground.
    Resume { responder: oneshot::Sender<()> },
    /// Current state of one item.
    ItemState {
        item_id: FeedItemId,
        responder: oneshot::Sender<Option<ItemStatus>>,
    },
    /// State of the whole session.
    Snapshot {
        responder: oneshot::Sender<SessionSnapshot>,
    },
    /// Release every player and stop the actor.
    Shutdown { responder: oneshot::Sender<()> },
}

/// Progress notifications for presentation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Resolution started; show a loading indicator if visible
    ItemLoading { item_id: FeedItemId },
    ItemReady { item_id: FeedItemId, path: PathBuf },
    /// The visible item could not be loaded
    ItemFailed {
        item_id: FeedItemId,
        reason: String,
        retryable: bool,
    },
    PlaybackStarted { item_id: FeedItemId },
    PlaybackPaused { item_id: FeedItemId },
    BindingReleased { item_id: FeedItemId },
}

/// Resolution and player state of one feed item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatus {
    pub item_id: FeedItemId,
    pub content_id: ContentId,
    pub load: ItemLoadState,
    pub binding: BindingState,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub items: Vec<ItemStatus>,
    pub active_index: Option<usize>,
    pub suspended: bool,
    pub playing: usize,
    pub bound: usize,
    pub pending_resolutions: usize,
}
