//! Handle for communicating with the feed session actor.

use tokio::sync::{broadcast, mpsc, oneshot};

use super::SessionError;
use super::commands::{ItemStatus, SessionCommand, SessionEvent, SessionSnapshot};
use crate::content::{FeedItem, FeedItemId};

/// Handle for communicating with the feed session actor.
///
/// Cheap to clone. The actor releases every player and stops once the last
/// handle is dropped.
#[derive(Clone)]
pub struct FeedSessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl FeedSessionHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<SessionCommand>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { sender, events }
    }

    /// Receives session events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Replaces the feed list.
    ///
    /// Known paths for items that survive are kept; players of removed
    /// items are released.
    ///
    /// # Errors
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn replace_feed(&self, items: Vec<FeedItem>) -> Result<(), SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::ReplaceFeed { items, responder })
            .await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Appends items and returns the new feed length.
    ///
    /// # Errors
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn append_feed(&self, items: Vec<FeedItem>) -> Result<usize, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::AppendFeed { items, responder })
            .await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Reports that the item at `index` is now the visible one.
    ///
    /// Returns once resolutions and player work have been started, not once
    /// they finish; follow `SessionEvent`s for the outcome. Calling it again
    /// for a failed item retries the load.
    ///
    /// # Errors
    /// - `SessionError::IndexOutOfRange` - No item at `index`
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn set_visible(&self, index: usize) -> Result<FeedItemId, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::SetVisible { index, responder })
            .await?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Pauses the playing item and releases the paused ones.
    ///
    /// # Errors
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn suspend(&self) -> Result<(), SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::Suspend { responder }).await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Resumes playback of the visible item.
    ///
    /// # Errors
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn resume(&self) -> Result<(), SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::Resume { responder }).await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// # Errors
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn item_state(&self, item_id: &FeedItemId) -> Result<Option<ItemStatus>, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::ItemState {
            item_id: item_id.clone(),
            responder,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// # Errors
    /// - `SessionError::Shutdown` - Actor has stopped
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { responder }).await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Releases every player and stops the actor.
    ///
    /// # Errors
    /// - `SessionError::Shutdown` - Actor had already stopped
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (responder, rx) = oneshot::channel();
        self.send(SessionCommand::Shutdown { responder }).await?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::Shutdown)
    }
}
