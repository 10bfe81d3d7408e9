//! Visibility-driven resolution of feed items.
//!
//! The manager is owned by a single coordinating task and never awaits:
//! every resolution runs in a spawned task whose result comes back as a
//! `ResolutionEvent` on the channel returned by `new`, to be fed into
//! `apply_resolution`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::FeedConfig;
use crate::content::{ContentId, FeedItem, FeedItemId};
use crate::fetch::{FetchCoordinator, FetchError};

/// Why a resolution was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePurpose {
    /// The item is the visible one; failures reach the user
    Active,
    /// The item is ahead of the visible one; failures are only logged
    Prefetch,
}

/// Result of a spawned resolution, delivered back to the owning task.
#[derive(Debug)]
pub struct ResolutionEvent {
    pub item_id: FeedItemId,
    pub content_id: ContentId,
    pub result: Result<PathBuf, FetchError>,
}

/// What changed after applying a `ResolutionEvent`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionUpdate {
    Ready { item_id: FeedItemId, path: PathBuf },
    /// Only produced for the active item
    Failed { item_id: FeedItemId, error: FetchError },
}

/// Resolution state of one item as seen by presentation code.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemLoadState {
    /// Nothing known and nothing running
    Idle,
    Loading,
    Ready(PathBuf),
    /// Active resolution failed; becoming visible again retries
    Failed(FetchError),
}

/// Positions to resolve when `active` becomes visible, active first.
///
/// Empty when `active` is outside the feed.
pub fn plan_visibility(len: usize, active: usize, depth: usize) -> Vec<(usize, ResolvePurpose)> {
    if active >= len {
        return Vec::new();
    }

    let last = active.saturating_add(depth).min(len - 1);
    std::iter::once((active, ResolvePurpose::Active))
        .chain((active + 1..=last).map(|index| (index, ResolvePurpose::Prefetch)))
        .collect()
}

/// Decides what to fetch for a feed and remembers what has resolved.
pub struct FeedResourceManager {
    coordinator: FetchCoordinator,
    prefetch_depth: usize,
    items: Vec<FeedItem>,
    positions: HashMap<FeedItemId, usize>,
    resolved: HashMap<FeedItemId, PathBuf>,
    pending: HashMap<FeedItemId, ResolvePurpose>,
    failed: HashMap<FeedItemId, FetchError>,
    active_index: Option<usize>,
    events: mpsc::UnboundedSender<ResolutionEvent>,
}

impl FeedResourceManager {
    pub fn new(
        coordinator: FetchCoordinator,
        config: &FeedConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ResolutionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            coordinator,
            prefetch_depth: config.prefetch_depth,
            items: Vec::new(),
            positions: HashMap::new(),
            resolved: HashMap::new(),
            pending: HashMap::new(),
            failed: HashMap::new(),
            active_index: None,
            events,
        };
        (manager, receiver)
    }

    /// Replaces the feed wholesale.
    ///
    /// Known paths and running resolutions of surviving items are kept when
    /// their content is unchanged. Returns the ids of items no longer in the
    /// feed.
    pub fn replace_items(&mut self, items: Vec<FeedItem>) -> Vec<FeedItemId> {
        let previous: HashMap<FeedItemId, ContentId> = self
            .items
            .drain(..)
            .map(|item| (item.id, item.content_id))
            .collect();
        self.positions.clear();
        self.active_index = None;

        for item in items {
            self.push_item(item);
        }

        let mut removed = Vec::new();
        for (item_id, content_id) in previous {
            let survives = self
                .position_of(&item_id)
                .is_some_and(|index| self.items[index].content_id == content_id);
            if !survives {
                self.resolved.remove(&item_id);
                self.pending.remove(&item_id);
                self.failed.remove(&item_id);
                if self.positions.contains_key(&item_id) {
                    debug!("Feed item {} now points at new content", item_id);
                } else {
                    removed.push(item_id);
                }
            }
        }

        debug!(
            "Feed replaced: {} items, {} removed, {} paths kept",
            self.items.len(),
            removed.len(),
            self.resolved.len()
        );
        removed
    }

    /// Appends items to the end of the feed, skipping ids already present.
    pub fn append_items(&mut self, items: Vec<FeedItem>) {
        for item in items {
            self.push_item(item);
        }
    }

    fn push_item(&mut self, item: FeedItem) {
        if self.positions.contains_key(&item.id) {
            warn!("Skipping duplicate feed item {}", item.id);
            return;
        }
        self.positions.insert(item.id.clone(), self.items.len());
        self.items.push(item);
    }

    /// Starts resolutions for the item at `active_index` and the items
    /// within prefetch depth after it.
    ///
    /// Items with a known path or a resolution already running are not
    /// resolved again; a running prefetch of the visible item is upgraded so
    /// its failure reaches the user. Returns the items whose resolution was
    /// started by this call.
    pub fn on_visibility_changed(&mut self, active_index: usize) -> Vec<FeedItemId> {
        if active_index >= self.items.len() {
            warn!(
                "Visibility index {} outside feed of {} items",
                active_index,
                self.items.len()
            );
            self.active_index = None;
            return Vec::new();
        }
        self.active_index = Some(active_index);

        let mut started = Vec::new();
        for (index, purpose) in plan_visibility(self.items.len(), active_index, self.prefetch_depth)
        {
            let item = &self.items[index];
            if self.resolved.contains_key(&item.id) {
                continue;
            }
            if let Some(running) = self.pending.get_mut(&item.id) {
                if purpose == ResolvePurpose::Active {
                    *running = ResolvePurpose::Active;
                }
                continue;
            }

            let item_id = item.id.clone();
            let content_id = item.content_id.clone();
            self.failed.remove(&item_id);
            self.pending.insert(item_id.clone(), purpose);
            self.spawn_resolution(item_id.clone(), content_id);
            started.push(item_id);
        }
        started
    }

    fn spawn_resolution(&self, item_id: FeedItemId, content_id: ContentId) {
        debug!("Resolving {} for feed item {}", content_id, item_id);
        let coordinator = self.coordinator.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = coordinator.resolve(&content_id).await;
            // Receiver gone means the owning session ended.
            let _ = events.send(ResolutionEvent {
                item_id,
                content_id,
                result,
            });
        });
    }

    /// Records a finished resolution.
    ///
    /// Results for items that left the feed, or whose content changed, are
    /// ignored. Prefetch failures are logged and dropped.
    pub fn apply_resolution(&mut self, event: ResolutionEvent) -> Option<ResolutionUpdate> {
        let ResolutionEvent {
            item_id,
            content_id,
            result,
        } = event;

        let current = self
            .position_of(&item_id)
            .is_some_and(|index| self.items[index].content_id == content_id);
        if !current {
            debug!("Ignoring stale resolution of {} for {}", content_id, item_id);
            return None;
        }

        let purpose = self
            .pending
            .remove(&item_id)
            .unwrap_or(ResolvePurpose::Prefetch);

        match result {
            Ok(path) => {
                self.resolved.insert(item_id.clone(), path.clone());
                Some(ResolutionUpdate::Ready { item_id, path })
            }
            Err(e) if purpose == ResolvePurpose::Active => {
                error!("Failed to load feed item {}: {}", item_id, e);
                self.failed.insert(item_id.clone(), e.clone());
                Some(ResolutionUpdate::Failed { item_id, error: e })
            }
            Err(e) => {
                warn!("Prefetch of feed item {} failed: {}", item_id, e);
                None
            }
        }
    }

    /// Forgets the known path of `item_id`, so the next visibility change
    /// resolves it through the cache again. Returns whether a path was known.
    ///
    /// Running resolutions are left alone.
    pub fn invalidate(&mut self, item_id: &FeedItemId) -> bool {
        let forgotten = self.resolved.remove(item_id).is_some();
        if forgotten {
            debug!("Forgot local path of feed item {}", item_id);
        }
        forgotten
    }

    /// Known local path for an item, without touching disk or network.
    pub fn resource_for(&self, item_id: &FeedItemId) -> Option<&Path> {
        self.resolved.get(item_id).map(PathBuf::as_path)
    }

    pub fn load_state(&self, item_id: &FeedItemId) -> ItemLoadState {
        if let Some(path) = self.resolved.get(item_id) {
            ItemLoadState::Ready(path.clone())
        } else if self.pending.contains_key(item_id) {
            ItemLoadState::Loading
        } else if let Some(error) = self.failed.get(item_id) {
            ItemLoadState::Failed(error.clone())
        } else {
            ItemLoadState::Idle
        }
    }

    pub fn is_pending(&self, item_id: &FeedItemId) -> bool {
        self.pending.contains_key(item_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn item_at(&self, index: usize) -> Option<&FeedItem> {
        self.items.get(index)
    }

    pub fn position_of(&self, item_id: &FeedItemId) -> Option<usize> {
        self.positions.get(item_id).copied()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    /// The visible item, if any.
    pub fn active_item(&self) -> Option<&FeedItem> {
        self.active_index.and_then(|index| self.items.get(index))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
