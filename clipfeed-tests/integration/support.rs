//! Shared fixtures for integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use clipfeed_core::config::ClipfeedConfig;
use clipfeed_core::content::{ContentId, FeedItem, FeedItemId, MediaKind, UserId};
use clipfeed_core::feed::ItemLoadState;
use clipfeed_core::fetch::FetchCoordinator;
use clipfeed_core::player::HeadlessPlayerBackend;
use clipfeed_core::session::{FeedSessionHandle, SessionEvent, spawn_feed_session};
use clipfeed_core::storage::{DiskCache, UnboundedRetention};
use clipfeed_core::test_mocks::{MockPlayerBackend, MockResolver, MockTransport};
use tokio::sync::broadcast;

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub resolver: Arc<MockResolver>,
    pub transport: Arc<MockTransport>,
    pub coordinator: FetchCoordinator,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(MockResolver::new());
        let transport = Arc::new(MockTransport::new());
        let coordinator = coordinator_at(&dir, resolver.clone(), transport.clone()).await;

        Self {
            dir,
            resolver,
            transport,
            coordinator,
        }
    }

    pub fn config(&self) -> ClipfeedConfig {
        ClipfeedConfig::for_testing(self.dir.path())
    }

    pub fn spawn_session(&self) -> (FeedSessionHandle, Arc<MockPlayerBackend>) {
        let backend = Arc::new(MockPlayerBackend::new());
        let session = spawn_feed_session(self.config(), self.coordinator.clone(), backend.clone());
        (session, backend)
    }
}

/// Session whose players check that the file they open is really there.
pub fn spawn_headless_session(
    config: ClipfeedConfig,
    coordinator: FetchCoordinator,
) -> FeedSessionHandle {
    spawn_feed_session(config, coordinator, Arc::new(HeadlessPlayerBackend))
}

pub async fn coordinator_at(
    dir: &tempfile::TempDir,
    resolver: Arc<MockResolver>,
    transport: Arc<MockTransport>,
) -> FetchCoordinator {
    let cache = DiskCache::open_with_policy(dir.path(), Arc::new(UnboundedRetention))
        .await
        .unwrap();
    FetchCoordinator::new(Arc::new(cache), resolver, transport, MediaKind::Video)
}

pub fn content(n: usize) -> ContentId {
    ContentId::new(format!("clip-{n}")).unwrap()
}

pub fn item_id(n: usize) -> FeedItemId {
    FeedItemId::new(format!("post-{n}"))
}

/// Feed of `count` items, newest first.
pub fn feed(count: usize) -> Vec<FeedItem> {
    (0..count)
        .map(|n| {
            let mut item = FeedItem::new(
                format!("post-{n}"),
                content(n),
                UserId::new("alice"),
                format!("clip {n}"),
            );
            item.created_at = Utc
                .with_ymd_and_hms(2024, 6, 1, 12, 0, 0)
                .unwrap()
                - chrono::Duration::minutes(n as i64);
            item
        })
        .collect()
}

/// Waits for the first event matching `wanted`, skipping others.
///
/// # Panics
///
/// Panics if no matching event arrives within five seconds.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected session event was not received")
}

pub fn started(n: usize) -> impl Fn(&SessionEvent) -> bool {
    let expected = item_id(n);
    move |event| matches!(event, SessionEvent::PlaybackStarted { item_id } if *item_id == expected)
}

/// Matches the first playback start or failure of item `n`.
pub fn started_or_failed(n: usize) -> impl Fn(&SessionEvent) -> bool {
    let expected = item_id(n);
    move |event| match event {
        SessionEvent::PlaybackStarted { item_id } | SessionEvent::ItemFailed { item_id, .. } => {
            *item_id == expected
        }
        _ => false,
    }
}

/// Waits until item `n` has a known local path.
///
/// # Panics
///
/// Panics if the item is not ready within five seconds.
pub async fn wait_until_loaded(session: &FeedSessionHandle, n: usize) -> std::path::PathBuf {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = session.item_state(&item_id(n)).await.unwrap();
            if let Some(ItemLoadState::Ready(path)) = status.map(|status| status.load) {
                return path;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("item did not finish loading")
}

/// Waits until no resolution is running in the session.
pub async fn wait_until_settled(session: &FeedSessionHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.snapshot().await.unwrap().pending_resolutions > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("resolutions did not settle");
}
