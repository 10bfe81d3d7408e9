//! Scoped ownership of a playback resource.

use tracing::debug;

use super::{ObserverId, PlaybackObserver, PlaybackResource};
use crate::content::FeedItemId;

/// A feed item's live playback resource.
///
/// Dropping the binding removes its observer and releases the resource, so
/// every path out of the owning scope frees it.
pub struct PlaybackBinding {
    item_id: FeedItemId,
    ticket: u64,
    resource: Option<Box<dyn PlaybackResource>>,
    observer: Option<ObserverId>,
    playing: bool,
}

impl PlaybackBinding {
    /// Takes ownership of `resource` and registers `observer` on it.
    pub fn attach(
        item_id: FeedItemId,
        ticket: u64,
        mut resource: Box<dyn PlaybackResource>,
        observer: PlaybackObserver,
    ) -> Self {
        let observer = resource.add_observer(observer);
        Self {
            item_id,
            ticket,
            resource: Some(resource),
            observer: Some(observer),
            playing: false,
        }
    }

    pub fn item_id(&self) -> &FeedItemId {
        &self.item_id
    }

    /// Identifies the open request this binding came from.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn play(&mut self) {
        if let Some(resource) = self.resource.as_mut() {
            resource.play();
            self.playing = true;
        }
    }

    pub fn pause(&mut self) {
        if let Some(resource) = self.resource.as_mut() {
            resource.pause();
            self.playing = false;
        }
    }

    pub fn restart(&mut self) {
        if let Some(resource) = self.resource.as_mut() {
            resource.restart();
            self.playing = true;
        }
    }

    /// Releases the resource now.
    pub fn release(mut self) {
        self.release_resource();
    }

    fn release_resource(&mut self) {
        let Some(mut resource) = self.resource.take() else {
            return;
        };

        if let Some(observer) = self.observer.take() {
            resource.remove_observer(observer);
        }
        if self.playing {
            resource.pause();
            self.playing = false;
        }
        resource.release();
        debug!("Released player for {}", self.item_id);
    }
}

impl Drop for PlaybackBinding {
    fn drop(&mut self) {
        self.release_resource();
    }
}

impl std::fmt::Debug for PlaybackBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBinding")
            .field("item_id", &self.item_id)
            .field("ticket", &self.ticket)
            .field("playing", &self.playing)
            .field("released", &self.resource.is_none())
            .finish()
    }
}
