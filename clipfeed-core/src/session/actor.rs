//! Actor implementation for the feed session.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use super::SessionError;
use super::commands::{ItemStatus, SessionCommand, SessionEvent, SessionSnapshot};
use super::handle::FeedSessionHandle;
use crate::config::ClipfeedConfig;
use crate::content::{FeedItem, FeedItemId};
use crate::feed::{FeedResourceManager, ResolutionEvent, ResolutionUpdate};
use crate::fetch::FetchCoordinator;
use crate::player::{BindingState, PlayerBackend, PlayerEvent, PlayerRegistry, RegistryNotice};

const COMMAND_CHANNEL_SIZE: usize = 100;
const EVENT_CHANNEL_SIZE: usize = 256;

/// Spawns a feed session actor and returns its handle.
///
/// The session starts with an empty feed. It shares `coordinator` (and so
/// the disk cache and in-flight fetches) with anything else holding a
/// clone of it.
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
///
/// use clipfeed_core::config::ClipfeedConfig;
/// use clipfeed_core::content::MediaKind;
/// use clipfeed_core::fetch::FetchCoordinator;
/// use clipfeed_core::player::HeadlessPlayerBackend;
/// use clipfeed_core::remote::{HttpTransport, TemplateResolver};
/// use clipfeed_core::session::spawn_feed_session;
/// use clipfeed_core::storage::DiskCache;
///
/// let config = ClipfeedConfig::from_env();
/// let cache = Arc::new(DiskCache::open(&config.cache).await?);
/// let coordinator = FetchCoordinator::new(
///     cache,
///     Arc::new(TemplateResolver::new("https://media.example.com/{id}.mp4")?),
///     Arc::new(HttpTransport::new(&config.fetch)?),
///     MediaKind::Video,
/// );
/// let session = spawn_feed_session(config, coordinator, Arc::new(HeadlessPlayerBackend));
/// session.set_visible(0).await.ok();
/// # Ok(())
/// # }
/// ```
pub fn spawn_feed_session(
    config: ClipfeedConfig,
    coordinator: FetchCoordinator,
    backend: Arc<dyn PlayerBackend>,
) -> FeedSessionHandle {
    let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    let (manager, resolutions) = FeedResourceManager::new(coordinator, &config.feed);
    let (registry, player_events) = PlayerRegistry::new(backend, &config.player);

    let session = FeedSession {
        manager,
        registry,
        events: events.clone(),
    };

    tokio::spawn(async move {
        run_actor_loop(session, receiver, resolutions, player_events).await;
    });

    FeedSessionHandle::new(sender, events)
}

/// Processes commands and background results in arrival order until
/// shutdown or until every handle is gone.
async fn run_actor_loop(
    mut session: FeedSession,
    mut receiver: mpsc::Receiver<SessionCommand>,
    mut resolutions: mpsc::UnboundedReceiver<ResolutionEvent>,
    mut player_events: mpsc::UnboundedReceiver<PlayerEvent>,
) {
    tracing::debug!("Feed session actor started");

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(command) => {
                    if !session.handle_command(command) {
                        break;
                    }
                }
                None => {
                    session.terminate();
                    break;
                }
            },
            Some(event) = resolutions.recv() => session.on_resolution(event),
            Some(event) = player_events.recv() => session.on_player_event(event),
        }
    }

    tracing::debug!("Feed session actor stopped");
}

struct FeedSession {
    manager: FeedResourceManager,
    registry: PlayerRegistry,
    events: broadcast::Sender<SessionEvent>,
}

impl FeedSession {
    /// Returns false once the actor should stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::ReplaceFeed { items, responder } => {
                self.replace_feed(items);
                let _ = responder.send(());
            }
            SessionCommand::AppendFeed { items, responder } => {
                self.manager.append_items(items);
                let _ = responder.send(self.manager.len());
            }
            SessionCommand::SetVisible { index, responder } => {
                let _ = responder.send(self.set_visible(index));
            }
            SessionCommand::Suspend { responder } => {
                let notices = self.registry.suspend();
                self.publish_notices(notices);
                let _ = responder.send(());
            }
            SessionCommand::Resume { responder } => {
                let notices = self.registry.resume();
                self.publish_notices(notices);
                let _ = responder.send(());
            }
            SessionCommand::ItemState { item_id, responder } => {
                let _ = responder.send(self.item_status(&item_id));
            }
            SessionCommand::Snapshot { responder } => {
                let _ = responder.send(self.snapshot());
            }
            SessionCommand::Shutdown { responder } => {
                self.terminate();
                let _ = responder.send(());
                return false;
            }
        }
        true
    }

    fn replace_feed(&mut self, items: Vec<FeedItem>) {
        let removed = self.manager.replace_items(items);
        for item_id in removed {
            let notices = self.registry.on_item_removed(&item_id);
            self.publish_notices(notices);
        }
    }

    fn set_visible(&mut self, index: usize) -> Result<FeedItemId, SessionError> {
        let item_id = self
            .manager
            .item_at(index)
            .map(|item| item.id.clone())
            .ok_or(SessionError::IndexOutOfRange {
                index,
                len: self.manager.len(),
            })?;

        // A known path is only trusted while a player holds the file open;
        // otherwise it goes back through the cache, which re-fetches files
        // evicted or deleted since.
        if !matches!(
            self.registry.state(&item_id),
            BindingState::Active | BindingState::Inactive | BindingState::Loading
        ) {
            self.manager.invalidate(&item_id);
        }

        for started in self.manager.on_visibility_changed(index) {
            self.publish(SessionEvent::ItemLoading { item_id: started });
        }

        let notices = self
            .registry
            .on_item_visible(&item_id, self.manager.resource_for(&item_id));
        self.publish_notices(notices);

        Ok(item_id)
    }

    fn on_resolution(&mut self, event: ResolutionEvent) {
        match self.manager.apply_resolution(event) {
            Some(ResolutionUpdate::Ready { item_id, path }) => {
                self.registry.on_resource_ready(&item_id, &path);
                self.publish(SessionEvent::ItemReady { item_id, path });
            }
            Some(ResolutionUpdate::Failed { item_id, error }) => {
                self.registry.on_resource_failed(&item_id);
                self.publish(SessionEvent::ItemFailed {
                    item_id,
                    reason: error.to_string(),
                    retryable: error.is_retryable(),
                });
            }
            None => {}
        }
    }

    fn on_player_event(&mut self, event: PlayerEvent) {
        let notices = self.registry.handle_event(event);
        for notice in &notices {
            if let RegistryNotice::OpenFailed { item_id, .. } = notice {
                self.manager.invalidate(item_id);
            }
        }
        self.publish_notices(notices);
    }

    fn terminate(&mut self) {
        let notices = self.registry.terminate();
        self.publish_notices(notices);
    }

    fn item_status(&self, item_id: &FeedItemId) -> Option<ItemStatus> {
        let index = self.manager.position_of(item_id)?;
        let item = self.manager.item_at(index)?;
        Some(ItemStatus {
            item_id: item.id.clone(),
            content_id: item.content_id.clone(),
            load: self.manager.load_state(item_id),
            binding: self.registry.state(item_id),
        })
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            items: self
                .manager
                .items()
                .iter()
                .filter_map(|item| self.item_status(&item.id))
                .collect(),
            active_index: self.manager.active_index(),
            suspended: self.registry.is_suspended(),
            playing: self.registry.active_count(),
            bound: self.registry.bound_count(),
            pending_resolutions: self.manager.pending_count(),
        }
    }

    fn publish_notices(&self, notices: Vec<RegistryNotice>) {
        for notice in notices {
            let event = match notice {
                RegistryNotice::PlaybackStarted { item_id } => {
                    SessionEvent::PlaybackStarted { item_id }
                }
                RegistryNotice::PlaybackPaused { item_id } => {
                    SessionEvent::PlaybackPaused { item_id }
                }
                RegistryNotice::BindingReleased { item_id } => {
                    SessionEvent::BindingReleased { item_id }
                }
                RegistryNotice::OpenFailed { item_id, reason } => SessionEvent::ItemFailed {
                    item_id,
                    reason,
                    retryable: true,
                },
            };
            self.publish(event);
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::content::{ContentId, MediaKind, UserId};
    use crate::feed::ItemLoadState;
    use crate::storage::{DiskCache, UnboundedRetention};
    use crate::test_mocks::{MockPlayerBackend, MockResolver, MockTransport, wait_until};

    struct Fixture {
        _dir: tempfile::TempDir,
        resolver: Arc<MockResolver>,
        backend: Arc<MockPlayerBackend>,
        session: FeedSessionHandle,
    }

    async fn fixture(item_count: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ClipfeedConfig::for_testing(dir.path());
        let cache = DiskCache::open_with_policy(dir.path(), Arc::new(UnboundedRetention))
            .await
            .unwrap();
        let resolver = Arc::new(MockResolver::new());
        let coordinator = FetchCoordinator::new(
            Arc::new(cache),
            resolver.clone(),
            Arc::new(MockTransport::new()),
            MediaKind::Video,
        );
        let backend = Arc::new(MockPlayerBackend::new());
        let session = spawn_feed_session(config, coordinator, backend.clone());
        session
            .replace_feed((0..item_count).map(item).collect())
            .await
            .unwrap();

        Fixture {
            _dir: dir,
            resolver,
            backend,
            session,
        }
    }

    fn item(n: usize) -> FeedItem {
        FeedItem::new(
            format!("post-{n}"),
            ContentId::new(format!("clip-{n}")).unwrap(),
            UserId::new("alice"),
            format!("clip {n}"),
        )
    }

    async fn wait_for_event(
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
        .expect("event not received")
    }

    #[tokio::test]
    async fn test_visible_item_loads_and_plays() {
        let f = fixture(3).await;
        let mut events = f.session.subscribe();

        let item_id = f.session.set_visible(0).await.unwrap();

        wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::PlaybackStarted { item_id: id } if id == &item_id)
        })
        .await;
        let status = f.session.item_state(&item_id).await.unwrap().unwrap();
        assert!(matches!(status.load, ItemLoadState::Ready(_)));
        assert_eq!(status.binding, BindingState::Active);
    }

    #[tokio::test]
    async fn test_out_of_range_visibility_is_rejected() {
        let f = fixture(2).await;

        let result = f.session.set_visible(5).await;

        assert_eq!(
            result,
            Err(SessionError::IndexOutOfRange { index: 5, len: 2 })
        );
    }

    #[tokio::test]
    async fn test_active_failure_is_retryable() {
        let f = fixture(1).await;
        let content_id = ContentId::new("clip-0").unwrap();
        f.resolver.fail_next(&content_id, 1);
        let mut events = f.session.subscribe();

        f.session.set_visible(0).await.unwrap();
        let failed = wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::ItemFailed { .. })
        })
        .await;
        assert!(matches!(
            failed,
            SessionEvent::ItemFailed {
                retryable: true,
                ..
            }
        ));

        f.session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::PlaybackStarted { .. })
        })
        .await;
        assert_eq!(f.resolver.call_count(&content_id), 2);
    }

    #[tokio::test]
    async fn test_open_failure_forgets_path_and_resolves_again() {
        let f = fixture(1).await;
        let content_id = ContentId::new("clip-0").unwrap();
        let path = f._dir.path().join(format!("{}.mp4", content_id.file_stem()));
        f.backend.fail_path(&path);
        let mut events = f.session.subscribe();

        let item_id = f.session.set_visible(0).await.unwrap();
        let failed = wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::ItemFailed { .. })
        })
        .await;
        assert!(matches!(
            failed,
            SessionEvent::ItemFailed {
                retryable: true,
                ..
            }
        ));
        let status = f.session.item_state(&item_id).await.unwrap().unwrap();
        assert_eq!(status.load, ItemLoadState::Idle);
        assert_eq!(status.binding, BindingState::Unbound);

        f.session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::ItemLoading { item_id: id } if id == &item_id)
        })
        .await;
        wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::ItemFailed { .. })
        })
        .await;
        assert_eq!(f.backend.open_count(), 0);
        // The file itself was fine; the second resolution was a cache hit.
        assert_eq!(f.resolver.call_count(&content_id), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_players_and_stops() {
        let f = fixture(2).await;
        let mut events = f.session.subscribe();
        f.session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::PlaybackStarted { .. })
        })
        .await;

        f.session.shutdown().await.unwrap();

        assert_eq!(f.backend.live_count(), 0);
        assert_eq!(f.session.snapshot().await, Err(SessionError::Shutdown));
    }

    #[tokio::test]
    async fn test_dropping_handles_releases_players() {
        let f = fixture(1).await;
        let mut events = f.session.subscribe();
        f.session.set_visible(0).await.unwrap();
        wait_for_event(&mut events, |event| {
            matches!(event, SessionEvent::PlaybackStarted { .. })
        })
        .await;

        let backend = f.backend.clone();
        drop(f);

        wait_until(|| backend.live_count() == 0).await;
    }
}
