//! Playback resources and their lifecycle per feed item.
//!
//! A `PlayerBackend` builds a `PlaybackResource` for a local file. The
//! `PlayerRegistry` decides which items hold one, keeps at most one of them
//! playing, and releases every resource it stops needing through
//! `PlaybackBinding`.

pub mod binding;
pub mod headless;
pub mod registry;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use binding::PlaybackBinding;
pub use headless::HeadlessPlayerBackend;
pub use registry::{BindingState, PlayerEvent, PlayerRegistry, RegistryNotice};

/// Notification raised by a playback resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Playback reached the end of the media
    Finished,
    /// Playback stopped on an error
    Failed { reason: String },
}

/// Handle for removing a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Callback receiving playback events.
pub type PlaybackObserver = Box<dyn Fn(PlaybackEvent) + Send + Sync>;

/// A live player for one local media file.
///
/// Callers must remove their observers and call `release` before dropping
/// it; `PlaybackBinding` does both.
pub trait PlaybackResource: Send {
    fn play(&mut self);

    fn pause(&mut self);

    /// Seeks to the start and plays.
    fn restart(&mut self);

    fn add_observer(&mut self, observer: PlaybackObserver) -> ObserverId;

    fn remove_observer(&mut self, id: ObserverId);

    /// Stops playback and frees the underlying media pipeline.
    fn release(&mut self);
}

/// Constructs playback resources.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Opens `path` for playback. May take a while (asset loading).
    ///
    /// # Errors
    ///
    /// - `PlayerError::OpenFailed` - File missing or not playable
    async fn open(&self, path: &Path) -> Result<Box<dyn PlaybackResource>, PlayerError>;
}

/// Errors that occur while constructing players.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    #[error("Failed to open player for {}: {reason}", .path.display())]
    OpenFailed { path: PathBuf, reason: String },
}
