//! Eviction policies for the disk cache.
//!
//! The cache reports inserts, accesses and removals; after each publish it
//! asks the policy which entries to drop. Retention is unbounded by default.

use std::fmt;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::content::ContentId;

/// Decides which cache entries to evict.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Records a new or replaced entry.
    fn on_insert(&self, content_id: &ContentId, size_bytes: u64);

    /// Records a cache hit.
    fn on_access(&self, content_id: &ContentId);

    /// Records removal of an entry for any reason.
    fn on_remove(&self, content_id: &ContentId);

    /// Entries to evict now. Must never include `protected`.
    fn select_victims(&self, protected: &ContentId) -> Vec<ContentId>;

    /// Forgets every tracked entry.
    fn clear(&self);
}

/// Keeps everything until an explicit clear.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnboundedRetention;

impl EvictionPolicy for UnboundedRetention {
    fn on_insert(&self, _content_id: &ContentId, _size_bytes: u64) {}

    fn on_access(&self, _content_id: &ContentId) {}

    fn on_remove(&self, _content_id: &ContentId) {}

    fn select_victims(&self, _protected: &ContentId) -> Vec<ContentId> {
        Vec::new()
    }

    fn clear(&self) {}
}

struct LruState {
    order: LruCache<ContentId, u64>,
    total_bytes: u64,
}

/// Bounds total cached bytes, evicting least recently used entries first.
pub struct SizeBoundedLru {
    max_bytes: u64,
    state: Mutex<LruState>,
}

impl SizeBoundedLru {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(LruState {
                order: LruCache::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    /// Bytes currently tracked.
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }
}

impl fmt::Debug for SizeBoundedLru {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SizeBoundedLru")
            .field("max_bytes", &self.max_bytes)
            .field("total_bytes", &state.total_bytes)
            .field("entries", &state.order.len())
            .finish()
    }
}

impl EvictionPolicy for SizeBoundedLru {
    fn on_insert(&self, content_id: &ContentId, size_bytes: u64) {
        let mut state = self.state.lock();
        if let Some(previous) = state.order.put(content_id.clone(), size_bytes) {
            state.total_bytes = state.total_bytes.saturating_sub(previous);
        }
        state.total_bytes += size_bytes;
    }

    fn on_access(&self, content_id: &ContentId) {
        self.state.lock().order.promote(content_id);
    }

    fn on_remove(&self, content_id: &ContentId) {
        let mut state = self.state.lock();
        if let Some(size) = state.order.pop(content_id) {
            state.total_bytes = state.total_bytes.saturating_sub(size);
        }
    }

    fn select_victims(&self, protected: &ContentId) -> Vec<ContentId> {
        let state = self.state.lock();
        let mut remaining = state.total_bytes;
        let mut victims = Vec::new();

        // Iteration runs most- to least-recent; walk it backwards.
        for (content_id, size) in state.order.iter().rev() {
            if remaining <= self.max_bytes {
                break;
            }
            if content_id == protected {
                continue;
            }
            victims.push(content_id.clone());
            remaining = remaining.saturating_sub(*size);
        }

        victims
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.order.clear();
        state.total_bytes = 0;
    }
}

/// Builds the policy selected by `config`.
pub fn policy_from_config(config: &CacheConfig) -> Arc<dyn EvictionPolicy> {
    match config.max_cache_bytes {
        Some(max_bytes) => Arc::new(SizeBoundedLru::new(max_bytes)),
        None => Arc::new(UnboundedRetention),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ContentId {
        ContentId::new(raw).unwrap()
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let policy = UnboundedRetention;
        policy.on_insert(&id("a"), u64::MAX / 2);
        policy.on_insert(&id("b"), u64::MAX / 2);

        assert!(policy.select_victims(&id("b")).is_empty());
    }

    #[test]
    fn test_lru_evicts_least_recent_first() {
        let policy = SizeBoundedLru::new(25);
        policy.on_insert(&id("a"), 10);
        policy.on_insert(&id("b"), 10);
        policy.on_access(&id("a"));
        policy.on_insert(&id("c"), 10);

        assert_eq!(policy.total_bytes(), 30);
        assert_eq!(policy.select_victims(&id("c")), vec![id("b")]);
    }

    #[test]
    fn test_lru_skips_protected_entry() {
        let policy = SizeBoundedLru::new(5);
        policy.on_insert(&id("big"), 50);

        assert!(policy.select_victims(&id("big")).is_empty());

        policy.on_insert(&id("small"), 1);
        assert_eq!(policy.select_victims(&id("small")), vec![id("big")]);
    }

    #[test]
    fn test_lru_reinsert_and_remove_track_sizes() {
        let policy = SizeBoundedLru::new(100);
        policy.on_insert(&id("a"), 40);
        policy.on_insert(&id("a"), 10);
        assert_eq!(policy.total_bytes(), 10);

        policy.on_remove(&id("a"));
        policy.on_remove(&id("missing"));
        assert_eq!(policy.total_bytes(), 0);

        policy.on_insert(&id("b"), 7);
        policy.clear();
        assert_eq!(policy.total_bytes(), 0);
    }

    #[test]
    fn test_policy_from_config() {
        let unbounded = policy_from_config(&CacheConfig::default());
        assert!(format!("{unbounded:?}").contains("UnboundedRetention"));

        let bounded = policy_from_config(&CacheConfig {
            max_cache_bytes: Some(1024),
            ..Default::default()
        });
        assert!(format!("{bounded:?}").contains("SizeBoundedLru"));
    }
}
