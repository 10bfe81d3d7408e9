//! Player backend without a media pipeline.
//!
//! Opening checks that the file exists and is non-empty; playback calls are
//! only logged. Used by the command line tool and anywhere the lifecycle
//! matters but rendering does not.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::trace;

use super::{ObserverId, PlaybackObserver, PlaybackResource, PlayerBackend, PlayerError};

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPlayerBackend;

#[async_trait]
impl PlayerBackend for HeadlessPlayerBackend {
    async fn open(&self, path: &Path) -> Result<Box<dyn PlaybackResource>, PlayerError> {
        let open_failed = |reason: String| PlayerError::OpenFailed {
            path: path.to_path_buf(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| open_failed(e.to_string()))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(open_failed("not a non-empty file".to_string()));
        }

        Ok(Box::new(HeadlessPlayer {
            path: path.to_path_buf(),
            observers: Vec::new(),
            next_observer: 0,
        }))
    }
}

struct HeadlessPlayer {
    path: PathBuf,
    observers: Vec<(ObserverId, PlaybackObserver)>,
    next_observer: u64,
}

impl PlaybackResource for HeadlessPlayer {
    fn play(&mut self) {
        trace!("play {}", self.path.display());
    }

    fn pause(&mut self) {
        trace!("pause {}", self.path.display());
    }

    fn restart(&mut self) {
        trace!("restart {}", self.path.display());
    }

    fn add_observer(&mut self, observer: PlaybackObserver) -> ObserverId {
        self.next_observer += 1;
        let id = ObserverId::new(self.next_observer);
        self.observers.push((id, observer));
        id
    }

    fn remove_observer(&mut self, id: ObserverId) {
        self.observers.retain(|(registered, _)| *registered != id);
    }

    fn release(&mut self) {
        self.observers.clear();
        trace!("release {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_opens_existing_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, b"frames").unwrap();
        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();

        let backend = HeadlessPlayerBackend;

        assert!(backend.open(&clip).await.is_ok());
        assert!(matches!(
            backend.open(&empty).await,
            Err(PlayerError::OpenFailed { .. })
        ));
        assert!(matches!(
            backend.open(&dir.path().join("missing.mp4")).await,
            Err(PlayerError::OpenFailed { .. })
        ));
    }
}
