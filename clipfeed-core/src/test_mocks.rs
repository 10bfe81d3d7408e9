//! Mock collaborators for testing the acquisition engine.
//!
//! The resolver and transport count calls per content id and can be told to
//! fail. The transport serves a two-chunk body whose second chunk can be held
//! back, which keeps fetches in flight for as long as a test needs. The
//! player backend records every call made on the resources it hands out.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use url::Url;

use crate::content::ContentId;
use crate::player::{
    ObserverId, PlaybackEvent, PlaybackObserver, PlaybackResource, PlayerBackend, PlayerError,
};
use crate::remote::{MediaDownload, MediaTransport, RemoteError, RemoteResolver, TransportError};

const MOCK_MEDIA_HOST: &str = "https://media.test/";
const WAIT_STEP: Duration = Duration::from_millis(5);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within five seconds. Acceptable in
/// test fixtures where a timeout means the behavior under test is broken.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {WAIT_LIMIT:?}"
        );
        tokio::time::sleep(WAIT_STEP).await;
    }
}

/// Resolver mapping every id to `https://media.test/<hex stem>`.
#[derive(Debug, Default)]
pub struct MockResolver {
    calls: Mutex<Vec<ContentId>>,
    failures: Mutex<HashMap<ContentId, usize>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` resolutions of `content_id` fail.
    pub fn fail_next(&self, content_id: &ContentId, times: usize) {
        self.failures.lock().insert(content_id.clone(), times);
    }

    pub fn call_count(&self, content_id: &ContentId) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|called| *called == content_id)
            .count()
    }

    /// Every id resolved so far, in call order.
    pub fn calls(&self) -> Vec<ContentId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteResolver for MockResolver {
    async fn resolve_remote_url(&self, content_id: &ContentId) -> Result<Url, RemoteError> {
        self.calls.lock().push(content_id.clone());

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(content_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RemoteError::Backend {
                        reason: "mock resolution failure".to_string(),
                    });
                }
            }
        }

        Url::parse(&format!("{MOCK_MEDIA_HOST}{}", content_id.file_stem())).map_err(|e| {
            RemoteError::InvalidUrl {
                reason: e.to_string(),
            }
        })
    }
}

#[derive(Debug, Default)]
enum HeldBodies {
    #[default]
    None,
    All,
    Only(HashSet<ContentId>),
}

#[derive(Debug, Default)]
struct TransportState {
    downloads: HashMap<ContentId, usize>,
    failures: HashMap<ContentId, usize>,
    content_types: HashMap<ContentId, Option<String>>,
    extra_advertised: HashMap<ContentId, u64>,
    first_chunk_sent: HashSet<ContentId>,
    held: HeldBodies,
}

impl TransportState {
    fn is_held(&self, content_id: &ContentId) -> bool {
        match &self.held {
            HeldBodies::None => false,
            HeldBodies::All => true,
            HeldBodies::Only(ids) => ids.contains(content_id),
        }
    }
}

/// Transport serving `media:<id>:` followed by a fixed tail.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    gate: watch::Sender<bool>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            gate,
        }
    }

    /// Holds back the second chunk of every body until `release_bodies`.
    pub fn hold_bodies(&self) {
        self.state.lock().held = HeldBodies::All;
        self.gate.send_replace(false);
    }

    /// Holds back the second chunk of `content_id` only.
    pub fn hold_bodies_for(&self, content_id: &ContentId) {
        {
            let mut state = self.state.lock();
            match &mut state.held {
                HeldBodies::Only(ids) => {
                    ids.insert(content_id.clone());
                }
                held => *held = HeldBodies::Only(HashSet::from([content_id.clone()])),
            }
        }
        self.gate.send_replace(false);
    }

    pub fn release_bodies(&self) {
        self.state.lock().held = HeldBodies::None;
        self.gate.send_replace(true);
    }

    /// Makes the next `times` bodies of `content_id` fail after the first chunk.
    pub fn fail_next(&self, content_id: &ContentId, times: usize) {
        self.state.lock().failures.insert(content_id.clone(), times);
    }

    pub fn set_content_type(&self, content_id: &ContentId, content_type: Option<&str>) {
        self.state
            .lock()
            .content_types
            .insert(content_id.clone(), content_type.map(str::to_string));
    }

    /// Advertises more bytes than the body carries.
    pub fn advertise_extra_bytes(&self, content_id: &ContentId, extra: u64) {
        self.state
            .lock()
            .extra_advertised
            .insert(content_id.clone(), extra);
    }

    pub fn download_count(&self, content_id: &ContentId) -> usize {
        self.state
            .lock()
            .downloads
            .get(content_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_downloads(&self) -> usize {
        self.state.lock().downloads.values().sum()
    }

    pub fn first_chunk_sent(&self, content_id: &ContentId) -> bool {
        self.state.lock().first_chunk_sent.contains(content_id)
    }

    /// Full payload served for `content_id`.
    pub fn payload_for(content_id: &ContentId) -> Vec<u8> {
        let (head, tail) = Self::chunks_for(content_id);
        [head.as_ref(), tail.as_ref()].concat()
    }

    fn chunks_for(content_id: &ContentId) -> (Bytes, Bytes) {
        (
            Bytes::from(format!("media:{content_id}:")),
            Bytes::from_static(b"mock-video-tail"),
        )
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn download(&self, url: &Url) -> Result<MediaDownload, TransportError> {
        let stem = url.path().trim_start_matches('/');
        let content_id = ContentId::from_file_stem(stem).map_err(|_| TransportError::Status {
            url: url.to_string(),
            status: 404,
        })?;

        let (fail, content_type, extra) = {
            let mut state = self.state.lock();
            *state.downloads.entry(content_id.clone()).or_default() += 1;
            let fail = match state.failures.get_mut(&content_id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            let content_type = state
                .content_types
                .get(&content_id)
                .cloned()
                .unwrap_or_else(|| Some("video/mp4".to_string()));
            let extra = state
                .extra_advertised
                .get(&content_id)
                .copied()
                .unwrap_or(0);
            (fail, content_type, extra)
        };

        let (head, tail) = Self::chunks_for(&content_id);
        let content_length = (head.len() + tail.len()) as u64 + extra;

        let head_state = Arc::clone(&self.state);
        let head_id = content_id.clone();
        let head_chunk = stream::once(async move {
            head_state.lock().first_chunk_sent.insert(head_id);
            Ok(head)
        });

        let tail_state = Arc::clone(&self.state);
        let mut gate = self.gate.subscribe();
        let body_url = url.to_string();
        let tail_chunk = stream::once(async move {
            let held = tail_state.lock().is_held(&content_id);
            if held {
                let _ = gate.wait_for(|open| *open).await;
            }
            if fail {
                Err(TransportError::Body {
                    url: body_url,
                    reason: "mock connection reset".to_string(),
                })
            } else {
                Ok(tail)
            }
        });

        Ok(MediaDownload {
            content_type,
            content_length: Some(content_length),
            body: head_chunk.chain(tail_chunk).boxed(),
        })
    }
}

/// Calls observed on one mock playback resource.
#[derive(Default)]
pub struct PlayerProbe {
    pub path: PathBuf,
    pub play_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub restart_calls: AtomicUsize,
    pub released: AtomicBool,
    observers: Mutex<Vec<(ObserverId, PlaybackObserver)>>,
}

impl PlayerProbe {
    pub fn is_playing(&self) -> bool {
        !self.released.load(Ordering::SeqCst)
            && self.play_calls.load(Ordering::SeqCst) + self.restart_calls.load(Ordering::SeqCst)
                > self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Delivers `event` to every registered observer; returns how many ran.
    pub fn emit(&self, event: PlaybackEvent) -> usize {
        let observers = self.observers.lock();
        for (_, observer) in observers.iter() {
            observer(event.clone());
        }
        observers.len()
    }
}

impl std::fmt::Debug for PlayerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerProbe")
            .field("path", &self.path)
            .field("play_calls", &self.play_calls)
            .field("pause_calls", &self.pause_calls)
            .field("released", &self.released)
            .field("observers", &self.observer_count())
            .finish()
    }
}

struct MockPlayer {
    probe: Arc<PlayerProbe>,
    next_observer: u64,
}

impl PlaybackResource for MockPlayer {
    fn play(&mut self) {
        self.probe.play_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.probe.pause_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn restart(&mut self) {
        self.probe.restart_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn add_observer(&mut self, observer: PlaybackObserver) -> ObserverId {
        self.next_observer += 1;
        let id = ObserverId::new(self.next_observer);
        self.probe.observers.lock().push((id, observer));
        id
    }

    fn remove_observer(&mut self, id: ObserverId) {
        self.probe
            .observers
            .lock()
            .retain(|(registered, _)| *registered != id);
    }

    fn release(&mut self) {
        self.probe.released.store(true, Ordering::SeqCst);
    }
}

/// Backend handing out `MockPlayer`s and keeping a probe for each.
#[derive(Debug, Default)]
pub struct MockPlayerBackend {
    probes: Mutex<Vec<Arc<PlayerProbe>>>,
    failing_paths: Mutex<HashSet<PathBuf>>,
    held: AtomicBool,
    gate: Mutex<Option<watch::Sender<bool>>>,
}

impl MockPlayerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes opening `path` fail.
    pub fn fail_path(&self, path: &Path) {
        self.failing_paths.lock().insert(path.to_path_buf());
    }

    /// Delays every `open` until `release_opens`.
    pub fn hold_opens(&self) {
        let (sender, _) = watch::channel(false);
        *self.gate.lock() = Some(sender);
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_opens(&self) {
        self.held.store(false, Ordering::SeqCst);
        if let Some(sender) = self.gate.lock().as_ref() {
            sender.send_replace(true);
        }
    }

    pub fn open_count(&self) -> usize {
        self.probes.lock().len()
    }

    /// Probes of every resource opened so far, in open order.
    pub fn probes(&self) -> Vec<Arc<PlayerProbe>> {
        self.probes.lock().clone()
    }

    /// Probes of resources opened for `path`.
    pub fn probes_for(&self, path: &Path) -> Vec<Arc<PlayerProbe>> {
        self.probes
            .lock()
            .iter()
            .filter(|probe| probe.path == path)
            .cloned()
            .collect()
    }

    /// Resources opened but not yet released.
    pub fn live_count(&self) -> usize {
        self.probes
            .lock()
            .iter()
            .filter(|probe| !probe.is_released())
            .count()
    }
}

#[async_trait]
impl PlayerBackend for MockPlayerBackend {
    async fn open(&self, path: &Path) -> Result<Box<dyn PlaybackResource>, PlayerError> {
        let gate = if self.held.load(Ordering::SeqCst) {
            self.gate.lock().as_ref().map(watch::Sender::subscribe)
        } else {
            None
        };
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        if self.failing_paths.lock().contains(path) {
            return Err(PlayerError::OpenFailed {
                path: path.to_path_buf(),
                reason: "mock open failure".to_string(),
            });
        }

        let probe = Arc::new(PlayerProbe {
            path: path.to_path_buf(),
            ..Default::default()
        });
        self.probes.lock().push(Arc::clone(&probe));

        Ok(Box::new(MockPlayer {
            probe,
            next_observer: 0,
        }))
    }
}
