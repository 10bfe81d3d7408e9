//! Per-item player lifecycle.
//!
//! Items move through Unbound, Loading, Active, Inactive and Released. At
//! most one item is Active (playing) at a time: the visible one. Resources
//! are opened in spawned tasks; their results and playback events come back
//! as `PlayerEvent`s on the channel returned by `new` and are fed into
//! `handle_event`. No method here awaits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{PlaybackBinding, PlaybackEvent, PlaybackResource, PlayerBackend, PlayerError};
use crate::config::PlayerConfig;
use crate::content::FeedItemId;

/// Lifecycle state of one item's player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    /// Waiting for a local path or for the player to open
    Loading,
    /// Bound and playing
    Active,
    /// Bound and paused, kept for instant resume
    Inactive,
    Released,
}

/// Asynchronous input for the registry.
pub enum PlayerEvent {
    Opened {
        item_id: FeedItemId,
        ticket: u64,
        result: Result<Box<dyn PlaybackResource>, PlayerError>,
    },
    Playback {
        item_id: FeedItemId,
        ticket: u64,
        event: PlaybackEvent,
    },
}

impl std::fmt::Debug for PlayerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerEvent::Opened {
                item_id,
                ticket,
                result,
            } => f
                .debug_struct("Opened")
                .field("item_id", item_id)
                .field("ticket", ticket)
                .field("ok", &result.is_ok())
                .finish(),
            PlayerEvent::Playback {
                item_id,
                ticket,
                event,
            } => f
                .debug_struct("Playback")
                .field("item_id", item_id)
                .field("ticket", ticket)
                .field("event", event)
                .finish(),
        }
    }
}

/// Observable outcome of a registry transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryNotice {
    PlaybackStarted { item_id: FeedItemId },
    PlaybackPaused { item_id: FeedItemId },
    BindingReleased { item_id: FeedItemId },
    OpenFailed { item_id: FeedItemId, reason: String },
}

enum Slot {
    Loading,
    Opening { ticket: u64 },
    Bound(PlaybackBinding),
}

/// Owns every playback binding of a feed session.
pub struct PlayerRegistry {
    backend: Arc<dyn PlayerBackend>,
    config: PlayerConfig,
    slots: HashMap<FeedItemId, Slot>,
    visible: Option<FeedItemId>,
    inactive_order: VecDeque<FeedItemId>,
    released: HashSet<FeedItemId>,
    suspended: bool,
    next_ticket: u64,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl PlayerRegistry {
    pub fn new(
        backend: Arc<dyn PlayerBackend>,
        config: &PlayerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let registry = Self {
            backend,
            config: config.clone(),
            slots: HashMap::new(),
            visible: None,
            inactive_order: VecDeque::new(),
            released: HashSet::new(),
            suspended: false,
            next_ticket: 1,
            events,
        };
        (registry, receiver)
    }

    /// Makes `item_id` the visible item.
    ///
    /// The previously visible item is paused (or abandons its pending
    /// player). A bound item resumes in place; otherwise a player is opened
    /// as soon as `path` is known.
    pub fn on_item_visible(
        &mut self,
        item_id: &FeedItemId,
        path: Option<&Path>,
    ) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();

        if let Some(previous) = self.visible.take() {
            if previous == *item_id {
                self.visible = Some(previous);
            } else {
                self.deactivate(&previous, &mut notices);
            }
        }
        self.visible = Some(item_id.clone());
        self.released.remove(item_id);

        match self.slots.get_mut(item_id) {
            Some(Slot::Bound(binding)) => {
                self.inactive_order.retain(|queued| queued != item_id);
                if !self.suspended && !binding.is_playing() {
                    binding.play();
                    debug!("Reusing player for {}", item_id);
                    notices.push(RegistryNotice::PlaybackStarted {
                        item_id: item_id.clone(),
                    });
                }
            }
            Some(Slot::Opening { .. }) => {}
            Some(Slot::Loading) | None => match path {
                Some(path) => self.start_open(item_id, path),
                None => {
                    debug!("{} waiting for its media", item_id);
                    self.slots.insert(item_id.clone(), Slot::Loading);
                }
            },
        }

        self.enforce_inactive_limit(&mut notices);
        notices
    }

    /// The visible item scrolled away with nothing replacing it.
    pub fn on_item_hidden(&mut self, item_id: &FeedItemId) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();
        if self.visible.as_ref() == Some(item_id) {
            self.visible = None;
            self.deactivate(item_id, &mut notices);
            self.enforce_inactive_limit(&mut notices);
        }
        notices
    }

    /// A local path became known for `item_id`.
    ///
    /// Only the visible item gets a player; others are opened when they
    /// become visible.
    pub fn on_resource_ready(&mut self, item_id: &FeedItemId, path: &Path) {
        if self.visible.as_ref() == Some(item_id)
            && matches!(self.slots.get(item_id), Some(Slot::Loading))
        {
            self.start_open(item_id, path);
        }
    }

    /// The visible item's media failed to load; stop waiting for it.
    pub fn on_resource_failed(&mut self, item_id: &FeedItemId) {
        if matches!(self.slots.get(item_id), Some(Slot::Loading)) {
            self.slots.remove(item_id);
        }
    }

    /// `item_id` left the feed; its player is released.
    pub fn on_item_removed(&mut self, item_id: &FeedItemId) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();
        if self.visible.as_ref() == Some(item_id) {
            self.visible = None;
        }
        self.release_item(item_id, &mut notices);
        notices
    }

    /// Applies an open result or playback event.
    pub fn handle_event(&mut self, event: PlayerEvent) -> Vec<RegistryNotice> {
        match event {
            PlayerEvent::Opened {
                item_id,
                ticket,
                result,
            } => self.on_opened(item_id, ticket, result),
            PlayerEvent::Playback {
                item_id,
                ticket,
                event,
            } => {
                self.on_playback(&item_id, ticket, event);
                Vec::new()
            }
        }
    }

    /// App moved to the background.
    ///
    /// The playing item is paused and kept; every other bound item is
    /// released.
    pub fn suspend(&mut self) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();
        self.suspended = true;

        if let Some(visible) = self.visible.clone() {
            if let Some(Slot::Bound(binding)) = self.slots.get_mut(&visible) {
                if binding.is_playing() {
                    binding.pause();
                    notices.push(RegistryNotice::PlaybackPaused { item_id: visible });
                }
            }
        }

        while let Some(item_id) = self.inactive_order.pop_front() {
            self.release_item(&item_id, &mut notices);
        }

        info!("Player registry suspended");
        notices
    }

    /// App returned to the foreground; the visible item plays again.
    pub fn resume(&mut self) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();
        self.suspended = false;

        if let Some(visible) = self.visible.clone() {
            if let Some(Slot::Bound(binding)) = self.slots.get_mut(&visible) {
                if !binding.is_playing() {
                    binding.play();
                    notices.push(RegistryNotice::PlaybackStarted { item_id: visible });
                }
            }
        }

        info!("Player registry resumed");
        notices
    }

    /// Releases every player. The registry stays usable.
    pub fn terminate(&mut self) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();
        self.visible = None;
        self.inactive_order.clear();

        let items: Vec<FeedItemId> = self.slots.keys().cloned().collect();
        for item_id in items {
            self.release_item(&item_id, &mut notices);
        }

        info!("Released {} players", notices.len());
        notices
    }

    pub fn state(&self, item_id: &FeedItemId) -> BindingState {
        match self.slots.get(item_id) {
            Some(Slot::Loading | Slot::Opening { .. }) => BindingState::Loading,
            Some(Slot::Bound(binding)) if binding.is_playing() => BindingState::Active,
            Some(Slot::Bound(_)) => BindingState::Inactive,
            None if self.released.contains(item_id) => BindingState::Released,
            None => BindingState::Unbound,
        }
    }

    /// Items currently playing; never more than one.
    pub fn active_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Bound(binding) if binding.is_playing()))
            .count()
    }

    pub fn bound_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Bound(_)))
            .count()
    }

    pub fn visible_item(&self) -> Option<&FeedItemId> {
        self.visible.as_ref()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn start_open(&mut self, item_id: &FeedItemId, path: &Path) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.slots
            .insert(item_id.clone(), Slot::Opening { ticket });
        debug!("Opening player #{} for {}", ticket, item_id);

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let item_id = item_id.clone();
        let path: PathBuf = path.to_path_buf();
        tokio::spawn(async move {
            let result = backend.open(&path).await;
            if let Err(PlayerEvent::Opened {
                result: Ok(mut resource),
                ..
            }) = events
                .send(PlayerEvent::Opened {
                    item_id,
                    ticket,
                    result,
                })
                .map_err(|e| e.0)
            {
                resource.release();
            }
        });
    }

    fn on_opened(
        &mut self,
        item_id: FeedItemId,
        ticket: u64,
        result: Result<Box<dyn PlaybackResource>, PlayerError>,
    ) -> Vec<RegistryNotice> {
        let mut notices = Vec::new();
        let wanted = matches!(
            self.slots.get(&item_id),
            Some(Slot::Opening { ticket: expected }) if *expected == ticket
        ) && self.visible.as_ref() == Some(&item_id);

        let resource = match result {
            Ok(resource) => resource,
            Err(e) => {
                if wanted {
                    warn!("{}", e);
                    self.slots.remove(&item_id);
                    notices.push(RegistryNotice::OpenFailed {
                        item_id,
                        reason: e.to_string(),
                    });
                }
                return notices;
            }
        };

        if !wanted {
            debug!("Player #{} for {} no longer wanted", ticket, item_id);
            let mut resource = resource;
            resource.release();
            return notices;
        }

        let events = self.events.clone();
        let observed_item = item_id.clone();
        let mut binding = PlaybackBinding::attach(
            item_id.clone(),
            ticket,
            resource,
            Box::new(move |event| {
                let _ = events.send(PlayerEvent::Playback {
                    item_id: observed_item.clone(),
                    ticket,
                    event,
                });
            }),
        );

        if !self.suspended {
            binding.play();
            notices.push(RegistryNotice::PlaybackStarted {
                item_id: item_id.clone(),
            });
        }
        info!("Bound player #{} to {}", ticket, item_id);
        self.slots.insert(item_id, Slot::Bound(binding));
        notices
    }

    fn on_playback(&mut self, item_id: &FeedItemId, ticket: u64, event: PlaybackEvent) {
        let Some(Slot::Bound(binding)) = self.slots.get_mut(item_id) else {
            return;
        };
        if binding.ticket() != ticket {
            return;
        }

        match event {
            PlaybackEvent::Finished if binding.is_playing() && self.config.loop_playback => {
                debug!("Looping {}", item_id);
                binding.restart();
            }
            PlaybackEvent::Finished => {}
            PlaybackEvent::Failed { reason } => {
                warn!("Playback of {} failed: {}", item_id, reason);
            }
        }
    }

    fn deactivate(&mut self, item_id: &FeedItemId, notices: &mut Vec<RegistryNotice>) {
        match self.slots.get_mut(item_id) {
            Some(Slot::Bound(binding)) => {
                if binding.is_playing() {
                    binding.pause();
                    notices.push(RegistryNotice::PlaybackPaused {
                        item_id: item_id.clone(),
                    });
                }
                self.inactive_order.push_back(item_id.clone());
            }
            Some(Slot::Loading | Slot::Opening { .. }) => {
                debug!("{} scrolled away before its player was ready", item_id);
                self.slots.remove(item_id);
                self.released.insert(item_id.clone());
            }
            None => {}
        }
    }

    fn enforce_inactive_limit(&mut self, notices: &mut Vec<RegistryNotice>) {
        while self.inactive_order.len() > self.config.max_inactive_bindings {
            if let Some(oldest) = self.inactive_order.pop_front() {
                self.release_item(&oldest, notices);
            }
        }
    }

    fn release_item(&mut self, item_id: &FeedItemId, notices: &mut Vec<RegistryNotice>) {
        self.inactive_order.retain(|queued| queued != item_id);
        match self.slots.remove(item_id) {
            Some(Slot::Bound(binding)) => {
                binding.release();
                notices.push(RegistryNotice::BindingReleased {
                    item_id: item_id.clone(),
                });
                self.released.insert(item_id.clone());
            }
            Some(Slot::Loading | Slot::Opening { .. }) => {
                self.released.insert(item_id.clone());
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::test_mocks::MockPlayerBackend;

    struct Fixture {
        backend: Arc<MockPlayerBackend>,
        registry: PlayerRegistry,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
    }

    fn fixture(max_inactive_bindings: usize) -> Fixture {
        let backend = Arc::new(MockPlayerBackend::new());
        let (registry, events) = PlayerRegistry::new(
            backend.clone(),
            &PlayerConfig {
                max_inactive_bindings,
                loop_playback: true,
            },
        );
        Fixture {
            backend,
            registry,
            events,
        }
    }

    fn item(n: usize) -> FeedItemId {
        FeedItemId::new(format!("post-{n}"))
    }

    fn path(n: usize) -> PathBuf {
        PathBuf::from(format!("/cache/clip-{n}.mp4"))
    }

    impl Fixture {
        async fn pump(&mut self) -> Vec<RegistryNotice> {
            let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("no player event")
                .expect("player channel closed");
            self.registry.handle_event(event)
        }

        async fn show_bound(&mut self, n: usize) {
            self.registry.on_item_visible(&item(n), Some(&path(n)));
            let notices = self.pump().await;
            assert_eq!(
                notices,
                vec![RegistryNotice::PlaybackStarted { item_id: item(n) }]
            );
        }
    }

    #[tokio::test]
    async fn test_loading_then_ready_binds_and_plays() {
        let mut f = fixture(2);

        f.registry.on_item_visible(&item(0), None);
        assert_eq!(f.registry.state(&item(0)), BindingState::Loading);
        assert_eq!(f.backend.open_count(), 0);

        f.registry.on_resource_ready(&item(0), &path(0));
        f.pump().await;

        assert_eq!(f.registry.state(&item(0)), BindingState::Active);
        assert!(f.backend.probes()[0].is_playing());
    }

    #[tokio::test]
    async fn test_single_active_binding() {
        let mut f = fixture(4);
        for n in 0..3 {
            f.show_bound(n).await;
            assert_eq!(f.registry.active_count(), 1);
        }

        assert_eq!(f.registry.state(&item(2)), BindingState::Active);
        assert_eq!(f.registry.state(&item(0)), BindingState::Inactive);
        assert_eq!(f.registry.state(&item(1)), BindingState::Inactive);
        let playing = f
            .backend
            .probes()
            .iter()
            .filter(|probe| probe.is_playing())
            .count();
        assert_eq!(playing, 1);
    }

    #[tokio::test]
    async fn test_scroll_back_reuses_player() {
        let mut f = fixture(2);
        f.show_bound(0).await;
        f.show_bound(1).await;

        let notices = f.registry.on_item_visible(&item(0), Some(&path(0)));

        assert!(notices.contains(&RegistryNotice::PlaybackStarted { item_id: item(0) }));
        assert!(notices.contains(&RegistryNotice::PlaybackPaused { item_id: item(1) }));
        assert_eq!(f.backend.open_count(), 2);
        assert_eq!(f.backend.probes_for(&path(0)).len(), 1);
        assert!(f.backend.probes_for(&path(0))[0].is_playing());
    }

    #[tokio::test]
    async fn test_inactive_bindings_are_bounded() {
        let mut f = fixture(1);
        f.show_bound(0).await;
        f.show_bound(1).await;

        let notices = f.registry.on_item_visible(&item(2), Some(&path(2)));

        assert!(notices.contains(&RegistryNotice::BindingReleased { item_id: item(0) }));
        assert_eq!(f.registry.state(&item(0)), BindingState::Released);
        assert_eq!(f.registry.state(&item(1)), BindingState::Inactive);
        assert!(f.backend.probes_for(&path(0))[0].is_released());
    }

    #[tokio::test]
    async fn test_scrolled_away_while_opening_releases_late_player() {
        let mut f = fixture(2);
        f.backend.hold_opens();

        f.registry.on_item_visible(&item(0), Some(&path(0)));
        f.registry.on_item_visible(&item(1), None);
        assert_eq!(f.registry.state(&item(0)), BindingState::Released);

        f.backend.release_opens();
        let notices = f.pump().await;

        assert!(notices.is_empty());
        assert_eq!(f.backend.live_count(), 0);
        assert_eq!(f.registry.bound_count(), 0);
    }

    #[tokio::test]
    async fn test_no_callbacks_after_release() {
        let mut f = fixture(0);
        f.show_bound(0).await;
        let probe = f.backend.probes()[0].clone();
        assert_eq!(probe.observer_count(), 1);

        f.registry.on_item_visible(&item(1), None);

        assert!(probe.is_released());
        assert_eq!(probe.observer_count(), 0);
        assert_eq!(probe.emit(PlaybackEvent::Finished), 0);
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finished_playback_loops() {
        let mut f = fixture(2);
        f.show_bound(0).await;
        let probe = f.backend.probes()[0].clone();

        probe.emit(PlaybackEvent::Finished);
        f.pump().await;

        assert_eq!(probe.restart_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.registry.state(&item(0)), BindingState::Active);
    }

    #[tokio::test]
    async fn test_suspend_pauses_active_and_releases_inactive() {
        let mut f = fixture(2);
        f.show_bound(0).await;
        f.show_bound(1).await;

        let notices = f.registry.suspend();

        assert!(notices.contains(&RegistryNotice::PlaybackPaused { item_id: item(1) }));
        assert!(notices.contains(&RegistryNotice::BindingReleased { item_id: item(0) }));
        assert_eq!(f.registry.state(&item(1)), BindingState::Inactive);
        assert_eq!(f.registry.active_count(), 0);

        let notices = f.registry.resume();
        assert_eq!(
            notices,
            vec![RegistryNotice::PlaybackStarted { item_id: item(1) }]
        );
        assert_eq!(f.backend.open_count(), 2);
    }

    #[tokio::test]
    async fn test_terminate_releases_everything() {
        let mut f = fixture(2);
        f.show_bound(0).await;
        f.show_bound(1).await;

        let notices = f.registry.terminate();

        assert_eq!(notices.len(), 2);
        assert_eq!(f.backend.live_count(), 0);
        assert!(
            f.backend
                .probes()
                .iter()
                .all(|probe| probe.observer_count() == 0)
        );
        assert_eq!(f.registry.visible_item(), None);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let mut f = fixture(2);
        f.backend.fail_path(&path(0));

        f.registry.on_item_visible(&item(0), Some(&path(0)));
        let notices = f.pump().await;

        assert!(matches!(
            notices.as_slice(),
            [RegistryNotice::OpenFailed { .. }]
        ));
        assert_eq!(f.registry.state(&item(0)), BindingState::Unbound);
    }

    #[tokio::test]
    async fn test_removed_item_is_released() {
        let mut f = fixture(2);
        f.show_bound(0).await;

        let notices = f.registry.on_item_removed(&item(0));

        assert_eq!(
            notices,
            vec![RegistryNotice::BindingReleased { item_id: item(0) }]
        );
        assert_eq!(f.registry.visible_item(), None);
        assert_eq!(f.backend.live_count(), 0);
    }
}
