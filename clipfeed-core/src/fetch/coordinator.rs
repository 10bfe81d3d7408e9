//! Single-flight fetch coordinator.
//!
//! Concurrent `resolve` calls for one content id share a single download.
//! Each download runs in its own task, so it keeps going and warms the
//! cache even when every caller has lost interest. Different ids never wait
//! on each other: the in-flight table is only locked for map updates.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::FetchError;
use super::in_flight::{FetchOutcome, InFlightFetch, Subscription};
use crate::content::{ContentId, MediaKind};
use crate::remote::{MediaDownload, MediaTransport, RemoteResolver};
use crate::storage::DiskCache;

/// Counters describing how resolutions were served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Resolutions answered straight from the disk cache
    pub cache_hits: u64,
    /// Callers that attached to a fetch already in progress
    pub joined: u64,
    /// Fetches that went to the network
    pub downloads_started: u64,
    /// Fetches that ended in an error
    pub downloads_failed: u64,
}

#[derive(Debug, Default)]
struct FetchCounters {
    cache_hits: AtomicU64,
    joined: AtomicU64,
    downloads_started: AtomicU64,
    downloads_failed: AtomicU64,
}

struct CoordinatorInner {
    cache: Arc<DiskCache>,
    resolver: Arc<dyn RemoteResolver>,
    transport: Arc<dyn MediaTransport>,
    expected_kind: MediaKind,
    in_flight: Mutex<HashMap<ContentId, InFlightFetch>>,
    next_fetch_id: AtomicU64,
    counters: FetchCounters,
}

/// Produces local paths for content ids.
///
/// Cheap to clone; clones share the cache, collaborators and in-flight table.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl FetchCoordinator {
    pub fn new(
        cache: Arc<DiskCache>,
        resolver: Arc<dyn RemoteResolver>,
        transport: Arc<dyn MediaTransport>,
        expected_kind: MediaKind,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                cache,
                resolver,
                transport,
                expected_kind,
                in_flight: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(1),
                counters: FetchCounters::default(),
            }),
        }
    }

    /// Returns a local path for `content_id`.
    ///
    /// Served from the disk cache when an entry of the expected media kind
    /// exists, otherwise by joining the
    /// in-flight fetch for the id or starting one. Failures are not retried
    /// here and are not remembered: the next call starts over.
    ///
    /// # Errors
    ///
    /// - `FetchError::RemoteResolutionFailed` - Backend could not produce a URL
    /// - `FetchError::DownloadFailed` - Transport failed or returned a non-success status
    /// - `FetchError::InvalidContentKind` - Origin served a non-media payload
    /// - `FetchError::IoFailure` - Staging or publishing the file failed
    pub async fn resolve(&self, content_id: &ContentId) -> Result<PathBuf, FetchError> {
        if let Some(path) = self
            .inner
            .cache
            .lookup_kind(content_id, self.inner.expected_kind)
            .await
        {
            self.inner.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }

        let mut subscription = self.subscribe(content_id);
        subscription.wait().await
    }

    /// Whether a fetch for `content_id` is currently running.
    pub fn is_in_flight(&self, content_id: &ContentId) -> bool {
        self.inner.in_flight.lock().contains_key(content_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Callers currently waiting on the fetch for `content_id`.
    pub fn subscriber_count(&self, content_id: &ContentId) -> Option<usize> {
        self.inner
            .in_flight
            .lock()
            .get(content_id)
            .map(|fetch| fetch.subscribers.load(Ordering::SeqCst))
    }

    pub fn cache(&self) -> &Arc<DiskCache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> FetchStats {
        let counters = &self.inner.counters;
        FetchStats {
            cache_hits: counters.cache_hits.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            downloads_started: counters.downloads_started.load(Ordering::Relaxed),
            downloads_failed: counters.downloads_failed.load(Ordering::Relaxed),
        }
    }

    fn subscribe(&self, content_id: &ContentId) -> Subscription {
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(existing) = in_flight.get(content_id) {
            self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Joining in-flight fetch #{} of {}",
                existing.fetch_id, content_id
            );
            return Subscription::new(
                content_id.clone(),
                existing.outcome.clone(),
                Arc::clone(&existing.subscribers),
            );
        }

        let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        let subscribers = Arc::new(AtomicUsize::new(0));
        in_flight.insert(
            content_id.clone(),
            InFlightFetch {
                fetch_id,
                outcome: receiver.clone(),
                subscribers: Arc::clone(&subscribers),
            },
        );
        drop(in_flight);

        let completion = FetchCompletion {
            inner: Arc::clone(&self.inner),
            content_id: content_id.clone(),
            fetch_id,
            sender,
        };
        let inner = Arc::clone(&self.inner);
        let task_id = content_id.clone();
        tokio::spawn(async move {
            let outcome = inner.fetch(&task_id).await;
            completion.complete(outcome);
        });

        Subscription::new(content_id.clone(), receiver, subscribers)
    }
}

impl CoordinatorInner {
    async fn fetch(&self, content_id: &ContentId) -> FetchOutcome {
        // A fetch that finished between the caller's miss and our
        // registration has already published.
        if let Some(path) = self.cache.lookup_kind(content_id, self.expected_kind).await {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }

        self.counters
            .downloads_started
            .fetch_add(1, Ordering::Relaxed);
        info!("Fetching {}", content_id);

        let result = self.download_and_publish(content_id).await;
        if let Err(e) = &result {
            self.counters
                .downloads_failed
                .fetch_add(1, Ordering::Relaxed);
            warn!("Fetch of {} failed: {}", content_id, e);
        }
        result
    }

    async fn download_and_publish(&self, content_id: &ContentId) -> FetchOutcome {
        let url = self
            .resolver
            .resolve_remote_url(content_id)
            .await
            .map_err(|e| FetchError::RemoteResolutionFailed {
                content_id: content_id.clone(),
                reason: e.to_string(),
            })?;

        let download_failed = |reason: String| FetchError::DownloadFailed {
            content_id: content_id.clone(),
            reason,
        };

        let MediaDownload {
            content_type,
            content_length,
            mut body,
        } = self
            .transport
            .download(&url)
            .await
            .map_err(|e| download_failed(e.to_string()))?;

        let mut staging = self
            .cache
            .stage(content_id)
            .await
            .map_err(|e| FetchError::from_cache(content_id, e))?;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| download_failed(e.to_string()))?;
            staging
                .write_chunk(&chunk)
                .await
                .map_err(|e| FetchError::from_cache(content_id, e))?;
        }

        if let Some(expected) = content_length {
            if staging.bytes_written() != expected {
                return Err(download_failed(format!(
                    "received {} of {} advertised bytes",
                    staging.bytes_written(),
                    expected
                )));
            }
        }

        let payload = staging
            .finish(content_type)
            .await
            .map_err(|e| FetchError::from_cache(content_id, e))?;

        self.cache
            .publish(payload, self.expected_kind)
            .await
            .map_err(|e| FetchError::from_cache(content_id, e))
    }
}

/// Removes the in-flight entry and fans out the result.
///
/// Dropping it without `complete` (the fetch task panicked) still removes
/// the entry; waiting subscribers then see the sender vanish.
struct FetchCompletion {
    inner: Arc<CoordinatorInner>,
    content_id: ContentId,
    fetch_id: u64,
    sender: watch::Sender<Option<FetchOutcome>>,
}

impl FetchCompletion {
    fn complete(self, outcome: FetchOutcome) {
        self.remove_entry();
        self.sender.send_replace(Some(outcome));
    }

    fn remove_entry(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        if in_flight
            .get(&self.content_id)
            .is_some_and(|fetch| fetch.fetch_id == self.fetch_id)
        {
            in_flight.remove(&self.content_id);
        }
    }
}

impl Drop for FetchCompletion {
    fn drop(&mut self) {
        self.remove_entry();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::storage::UnboundedRetention;
    use crate::test_mocks::{MockResolver, MockTransport, wait_until};

    struct Fixture {
        _dir: tempfile::TempDir,
        resolver: Arc<MockResolver>,
        transport: Arc<MockTransport>,
        coordinator: FetchCoordinator,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open_with_policy(dir.path(), Arc::new(UnboundedRetention))
            .await
            .unwrap();
        let resolver = Arc::new(MockResolver::new());
        let transport = Arc::new(MockTransport::new());
        let coordinator = FetchCoordinator::new(
            Arc::new(cache),
            resolver.clone(),
            transport.clone(),
            MediaKind::Video,
        );

        Fixture {
            _dir: dir,
            resolver,
            transport,
            coordinator,
        }
    }

    fn id(raw: &str) -> ContentId {
        ContentId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_download() {
        let f = fixture().await;
        let content_id = id("shared");
        f.transport.hold_bodies();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let coordinator = f.coordinator.clone();
            let content_id = content_id.clone();
            tasks.push(tokio::spawn(
                async move { coordinator.resolve(&content_id).await },
            ));
        }

        wait_until(|| f.coordinator.subscriber_count(&content_id) == Some(10)).await;
        f.transport.release_bodies();

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap());
        }

        assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(f.transport.download_count(&content_id), 1);
        assert_eq!(f.resolver.call_count(&content_id), 1);
        assert_eq!(f.coordinator.stats().joined, 9);
        assert_eq!(f.coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_failure() {
        let f = fixture().await;
        let content_id = id("broken");
        f.transport.fail_next(&content_id, 1);
        f.transport.hold_bodies();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let coordinator = f.coordinator.clone();
            let content_id = content_id.clone();
            tasks.push(tokio::spawn(
                async move { coordinator.resolve(&content_id).await },
            ));
        }
        wait_until(|| f.coordinator.subscriber_count(&content_id) == Some(4)).await;
        f.transport.release_bodies();

        let mut errors = Vec::new();
        for task in tasks {
            errors.push(task.await.unwrap().unwrap_err());
        }

        assert!(matches!(errors[0], FetchError::DownloadFailed { .. }));
        assert!(errors.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(f.transport.download_count(&content_id), 1);
    }

    #[tokio::test]
    async fn test_second_resolve_is_served_from_cache() {
        let f = fixture().await;
        let content_id = id("cached");

        let first = f.coordinator.resolve(&content_id).await.unwrap();
        let second = f.coordinator.resolve(&content_id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.resolver.call_count(&content_id), 1);
        assert_eq!(f.transport.download_count(&content_id), 1);
        assert_eq!(f.coordinator.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_not_remembered() {
        let f = fixture().await;
        let content_id = id("abc");
        f.resolver.fail_next(&content_id, 1);

        let first = f.coordinator.resolve(&content_id).await;
        assert!(matches!(
            first,
            Err(FetchError::RemoteResolutionFailed { .. })
        ));
        assert!(f.coordinator.cache().lookup(&content_id).await.is_none());
        assert_eq!(f.transport.download_count(&content_id), 0);

        let second = f.coordinator.resolve(&content_id).await;
        assert!(second.is_ok());
        assert_eq!(f.resolver.call_count(&content_id), 2);
        assert_eq!(f.transport.download_count(&content_id), 1);
    }

    #[tokio::test]
    async fn test_non_video_response_rejected() {
        let f = fixture().await;
        let content_id = id("login-page");
        f.transport.set_content_type(&content_id, Some("text/html"));

        let result = f.coordinator.resolve(&content_id).await;

        assert!(matches!(
            result,
            Err(FetchError::InvalidContentKind { .. })
        ));
        assert!(f.coordinator.cache().entries().is_empty());
    }

    #[tokio::test]
    async fn test_short_body_is_download_failure() {
        let f = fixture().await;
        let content_id = id("short");
        f.transport.advertise_extra_bytes(&content_id, 100);

        let result = f.coordinator.resolve(&content_id).await;

        assert!(matches!(result, Err(FetchError::DownloadFailed { .. })));
        assert!(f.coordinator.cache().lookup(&content_id).await.is_none());
    }

    #[tokio::test]
    async fn test_mid_download_lookup_sees_nothing() {
        let f = fixture().await;
        let content_id = id("slow");
        f.transport.hold_bodies();

        let coordinator = f.coordinator.clone();
        let task_id = content_id.clone();
        let task = tokio::spawn(async move { coordinator.resolve(&task_id).await });

        wait_until(|| f.transport.first_chunk_sent(&content_id)).await;
        assert!(f.coordinator.cache().lookup(&content_id).await.is_none());
        assert!(f.coordinator.is_in_flight(&content_id));

        f.transport.release_bodies();
        let path = task.await.unwrap().unwrap();
        assert_eq!(f.coordinator.cache().lookup(&content_id).await, Some(path));
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_warms_cache() {
        let f = fixture().await;
        let content_id = id("scrolled-away");
        f.transport.hold_bodies();

        let coordinator = f.coordinator.clone();
        let task_id = content_id.clone();
        let task = tokio::spawn(async move { coordinator.resolve(&task_id).await });
        wait_until(|| f.coordinator.subscriber_count(&content_id) == Some(1)).await;

        task.abort();
        let _ = task.await;
        wait_until(|| f.coordinator.subscriber_count(&content_id) == Some(0)).await;
        assert!(f.coordinator.is_in_flight(&content_id));

        f.transport.release_bodies();
        wait_until(|| !f.coordinator.is_in_flight(&content_id)).await;

        assert!(f.coordinator.cache().lookup(&content_id).await.is_some());
        assert_eq!(f.transport.download_count(&content_id), 1);
    }

    #[tokio::test]
    async fn test_slow_id_does_not_block_other_ids() {
        let f = fixture().await;
        let slow = id("slow");
        let fast = id("fast");
        f.transport.hold_bodies_for(&slow);

        let coordinator = f.coordinator.clone();
        let slow_id = slow.clone();
        let slow_task = tokio::spawn(async move { coordinator.resolve(&slow_id).await });

        let fast_path = tokio::time::timeout(Duration::from_secs(2), f.coordinator.resolve(&fast))
            .await
            .expect("unrelated id must not wait on the slow download")
            .unwrap();
        assert!(fast_path.exists());
        assert!(f.coordinator.is_in_flight(&slow));

        f.transport.release_bodies();
        assert!(slow_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cached_entry_of_other_kind_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let content_id = id("poster");
        let image_path = dir.path().join(format!("{}.jpg", content_id.file_stem()));
        std::fs::write(&image_path, b"jpeg bytes").unwrap();

        let cache = DiskCache::open_with_policy(dir.path(), Arc::new(UnboundedRetention))
            .await
            .unwrap();
        let transport = Arc::new(MockTransport::new());
        let coordinator = FetchCoordinator::new(
            Arc::new(cache),
            Arc::new(MockResolver::new()),
            transport.clone(),
            MediaKind::Video,
        );

        let path = coordinator.resolve(&content_id).await.unwrap();

        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("mp4"));
        assert_eq!(transport.download_count(&content_id), 1);
        assert!(!image_path.exists());
        assert_eq!(
            coordinator.cache().entry(&content_id).await.unwrap().media_kind,
            MediaKind::Video
        );
    }
}
