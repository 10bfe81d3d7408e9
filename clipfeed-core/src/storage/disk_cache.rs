//! Durable content id to local file mapping.
//!
//! Files live directly in the cache directory as `<hex stem>.<ext>`. Downloads
//! are staged under `.partial/` on the same filesystem and renamed into place
//! only after they are complete, so a truncated file is never visible under a
//! canonical name. The in-memory index is rebuilt from a directory scan on open.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use super::eviction::{EvictionPolicy, policy_from_config};
use super::keyed_lock::KeyedLocks;
use super::CacheError;
use crate::config::CacheConfig;
use crate::content::{ContentId, MediaKind};

const PARTIAL_DIR_NAME: &str = ".partial";
const DEFAULT_WRITE_BUFFER: usize = 64 * 1024;

/// A published cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub content_id: ContentId,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub media_kind: MediaKind,
}

/// Snapshot of cache contents and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub purged: u64,
    pub published: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    purged: AtomicU64,
    published: AtomicU64,
    evicted: AtomicU64,
}

/// Download staged in `.partial/`, deleted on drop unless published.
pub struct StagingFile {
    content_id: ContentId,
    writer: BufWriter<fs::File>,
    path: TempPath,
    bytes_written: u64,
}

impl StagingFile {
    /// Appends a chunk of payload.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - Write to the staging file failed
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), CacheError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|source| CacheError::io(&self.path, source))?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn content_id(&self) -> &ContentId {
        &self.content_id
    }

    /// Flushes and syncs the payload, closing the file.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - Flush or fsync failed
    pub async fn finish(mut self, declared_kind: Option<String>) -> Result<StagedPayload, CacheError> {
        self.writer
            .flush()
            .await
            .map_err(|source| CacheError::io(&self.path, source))?;
        let file = self.writer.into_inner();
        file.sync_all()
            .await
            .map_err(|source| CacheError::io(&self.path, source))?;
        drop(file);

        Ok(StagedPayload {
            content_id: self.content_id,
            temp_path: self.path,
            size_bytes: self.bytes_written,
            declared_kind,
        })
    }
}

/// Complete payload waiting to be published.
pub struct StagedPayload {
    pub content_id: ContentId,
    pub temp_path: TempPath,
    pub size_bytes: u64,
    /// Content type declared by the transport, e.g. `video/mp4`
    pub declared_kind: Option<String>,
}

/// Disk-backed media cache.
///
/// Safe to share between concurrent fetches: file operations are serialized
/// per content id and the index lock is never held across an await.
pub struct DiskCache {
    root: PathBuf,
    partial_dir: PathBuf,
    write_buffer_size: usize,
    index: Mutex<HashMap<ContentId, CacheEntry>>,
    locks: KeyedLocks<ContentId>,
    policy: Arc<dyn EvictionPolicy>,
    counters: CacheCounters,
}

impl DiskCache {
    /// Opens the cache at `config.cache_dir` with the configured eviction policy.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - Cache directory cannot be created or scanned
    pub async fn open(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::open_with_policy(&config.cache_dir, policy_from_config(config)).await
    }

    /// Opens the cache at `root` with an explicit eviction policy.
    ///
    /// Leftover staging files from an earlier run are discarded and the
    /// index is rebuilt from the files present.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - Cache directory cannot be created or scanned
    pub async fn open_with_policy(
        root: &Path,
        policy: Arc<dyn EvictionPolicy>,
    ) -> Result<Self, CacheError> {
        let root = root.to_path_buf();
        let partial_dir = root.join(PARTIAL_DIR_NAME);

        fs::create_dir_all(&root)
            .await
            .map_err(|source| CacheError::io(&root, source))?;

        match fs::remove_dir_all(&partial_dir).await {
            Ok(()) => debug!("Discarded stale staging files in {}", partial_dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(CacheError::io(&partial_dir, source)),
        }
        fs::create_dir_all(&partial_dir)
            .await
            .map_err(|source| CacheError::io(&partial_dir, source))?;

        let mut scanned = scan_cache_dir(&root).await?;
        // Oldest first so the policy sees them as least recently used.
        scanned.sort_by_key(|entry| entry.created_at);

        let mut index = HashMap::with_capacity(scanned.len());
        for entry in scanned {
            policy.on_insert(&entry.content_id, entry.size_bytes);
            index.insert(entry.content_id.clone(), entry);
        }

        info!(
            "Opened media cache at {} with {} entries",
            root.display(),
            index.len()
        );

        Ok(Self {
            root,
            partial_dir,
            write_buffer_size: DEFAULT_WRITE_BUFFER,
            index: Mutex::new(index),
            locks: KeyedLocks::new(),
            policy,
            counters: CacheCounters::default(),
        })
    }

    /// Sets the buffer size used by staging writers.
    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path for `content_id` stored as `kind`.
    pub fn canonical_path(&self, content_id: &ContentId, kind: MediaKind) -> PathBuf {
        self.root
            .join(format!("{}.{}", content_id.file_stem(), kind.extension()))
    }

    /// Returns the cached path for `content_id` if its file is still intact.
    ///
    /// Entries whose file vanished or changed size are purged and reported
    /// as absent.
    pub async fn lookup(&self, content_id: &ContentId) -> Option<PathBuf> {
        self.entry(content_id).await.ok().map(|entry| entry.local_path)
    }

    /// Like `lookup`, but an entry stored as another media kind counts as
    /// absent.
    pub async fn lookup_kind(&self, content_id: &ContentId, kind: MediaKind) -> Option<PathBuf> {
        let entry = self.entry(content_id).await.ok()?;
        if entry.media_kind != kind {
            debug!(
                "Cached {} is {:?}, wanted {:?}",
                content_id, entry.media_kind, kind
            );
            return None;
        }
        Some(entry.local_path)
    }

    /// Returns the validated entry for `content_id`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Miss` - No entry, or the recorded file is gone or damaged
    pub async fn entry(&self, content_id: &ContentId) -> Result<CacheEntry, CacheError> {
        let recorded = self.index.lock().get(content_id).cloned();

        let Some(entry) = recorded else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache miss for {}", content_id);
            return Err(CacheError::Miss {
                content_id: content_id.clone(),
            });
        };

        if file_matches(&entry).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            self.policy.on_access(content_id);
            debug!("Cache hit for {} at {}", content_id, entry.local_path.display());
            return Ok(entry);
        }

        let _guard = self.locks.lock(content_id).await;

        // A publish may have replaced the entry while we waited.
        let current = self.index.lock().get(content_id).cloned();
        if let Some(current) = current {
            if current != entry && file_matches(&current).await {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.policy.on_access(content_id);
                return Ok(current);
            }
            self.index.lock().remove(content_id);
            self.policy.on_remove(content_id);
            self.counters.purged.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Purged dangling cache entry for {} ({})",
                content_id,
                current.local_path.display()
            );
            remove_file_if_present(&current.local_path).await;
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::Miss {
            content_id: content_id.clone(),
        })
    }

    /// Creates a staging file for a download of `content_id`.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - Staging file cannot be created
    pub async fn stage(&self, content_id: &ContentId) -> Result<StagingFile, CacheError> {
        let prefix = format!("{}-", content_id.file_stem());
        let partial_dir = self.partial_dir.clone();

        let named = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".part")
                .tempfile_in(&partial_dir)
        })
        .await
        .map_err(|join| CacheError::io(&self.partial_dir, io::Error::other(join)))?
        .map_err(|source| CacheError::io(&self.partial_dir, source))?;

        let (file, path) = named.into_parts();
        debug!("Staging {} at {}", content_id, path.display());

        Ok(StagingFile {
            content_id: content_id.clone(),
            writer: BufWriter::with_capacity(self.write_buffer_size, fs::File::from_std(file)),
            path,
            bytes_written: 0,
        })
    }

    /// Moves a complete payload into the cache under its canonical name.
    ///
    /// The declared content type must match `expected`; on any failure the
    /// staged file is deleted and nothing becomes visible.
    ///
    /// # Errors
    ///
    /// - `CacheError::InvalidContentKind` - Declared type does not match `expected`
    /// - `CacheError::Io` - Payload is empty or truncated, or the rename failed
    pub async fn publish(
        &self,
        payload: StagedPayload,
        expected: MediaKind,
    ) -> Result<PathBuf, CacheError> {
        let StagedPayload {
            content_id,
            temp_path,
            size_bytes,
            declared_kind,
        } = payload;

        if !expected.accepts(declared_kind.as_deref()) {
            return Err(CacheError::InvalidContentKind {
                content_id,
                expected,
                declared: declared_kind.unwrap_or_else(|| "<none>".to_string()),
            });
        }

        verify_staged(&temp_path, size_bytes).await?;

        let final_path = self.canonical_path(&content_id, expected);
        let guard = self.locks.lock(&content_id).await;

        let target = final_path.clone();
        tokio::task::spawn_blocking(move || temp_path.persist(&target))
            .await
            .map_err(|join| CacheError::io(&final_path, io::Error::other(join)))?
            .map_err(|persist| CacheError::io(&final_path, persist.error))?;

        let entry = CacheEntry {
            content_id: content_id.clone(),
            local_path: final_path.clone(),
            size_bytes,
            created_at: Utc::now(),
            media_kind: expected,
        };

        let replaced = self.index.lock().insert(content_id.clone(), entry);
        if let Some(old) = replaced {
            if old.local_path != final_path {
                remove_file_if_present(&old.local_path).await;
            }
        }
        self.policy.on_insert(&content_id, size_bytes);
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        drop(guard);

        info!(
            "Published {} ({} bytes) to {}",
            content_id,
            size_bytes,
            final_path.display()
        );

        self.enforce_policy(&content_id).await;
        Ok(final_path)
    }

    /// Removes one entry and its file. Returns whether an entry existed.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - File exists but could not be deleted
    pub async fn remove(&self, content_id: &ContentId) -> Result<bool, CacheError> {
        let _guard = self.locks.lock(content_id).await;

        let Some(entry) = self.index.lock().remove(content_id) else {
            return Ok(false);
        };
        self.policy.on_remove(content_id);

        match fs::remove_file(&entry.local_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(CacheError::io(&entry.local_path, source)),
        }

        debug!("Removed cache entry for {}", content_id);
        Ok(true)
    }

    /// Clears the index and deletes every cached file. Returns the number of
    /// entries removed. Staging files of in-flight downloads are left alone.
    ///
    /// # Errors
    ///
    /// - `CacheError::Io` - A cached file could not be deleted
    pub async fn evict_all(&self) -> Result<usize, CacheError> {
        let drained: Vec<CacheEntry> = {
            let mut index = self.index.lock();
            index.drain().map(|(_, entry)| entry).collect()
        };
        self.policy.clear();

        let mut first_error = None;
        for entry in &drained {
            let _guard = self.locks.lock(&entry.content_id).await;
            match fs::remove_file(&entry.local_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    warn!("Failed to delete {}: {}", entry.local_path.display(), source);
                    first_error.get_or_insert(CacheError::io(&entry.local_path, source));
                }
            }
        }

        info!("Evicted {} cache entries from {}", drained.len(), self.root.display());

        match first_error {
            Some(error) => Err(error),
            None => Ok(drained.len()),
        }
    }

    /// All indexed entries, oldest first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.index.lock().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        entries
    }

    /// Whether `content_id` is indexed, without touching the filesystem.
    pub fn contains(&self, content_id: &ContentId) -> bool {
        self.index.lock().contains_key(content_id)
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, total_bytes) = {
            let index = self.index.lock();
            (index.len(), index.values().map(|e| e.size_bytes).sum())
        };

        CacheStats {
            entries,
            total_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            purged: self.counters.purged.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    async fn enforce_policy(&self, protected: &ContentId) {
        for victim in self.policy.select_victims(protected) {
            match self.remove(&victim).await {
                Ok(true) => {
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                    debug!("Evicted {} to honor cache policy", victim);
                }
                Ok(false) => {
                    // Not indexed any more; make sure the policy forgets it too.
                    self.policy.on_remove(&victim);
                }
                Err(e) => warn!("Eviction of {} failed: {}", victim, e),
            }
        }
    }
}

async fn file_matches(entry: &CacheEntry) -> bool {
    match fs::metadata(&entry.local_path).await {
        Ok(metadata) => metadata.is_file() && metadata.len() == entry.size_bytes,
        Err(_) => false,
    }
}

async fn verify_staged(temp_path: &Path, expected_size: u64) -> Result<(), CacheError> {
    let metadata = fs::metadata(temp_path)
        .await
        .map_err(|source| CacheError::io(temp_path, source))?;

    if expected_size == 0 || metadata.len() != expected_size {
        return Err(CacheError::io(
            temp_path,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "staged payload is {} bytes, expected {} non-empty",
                    metadata.len(),
                    expected_size
                ),
            ),
        ));
    }
    Ok(())
}

async fn remove_file_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    }
}

async fn scan_cache_dir(root: &Path) -> Result<Vec<CacheEntry>, CacheError> {
    let mut reader = fs::read_dir(root)
        .await
        .map_err(|source| CacheError::io(root, source))?;
    let mut entries = Vec::new();

    while let Some(dir_entry) = reader
        .next_entry()
        .await
        .map_err(|source| CacheError::io(root, source))?
    {
        let path = dir_entry.path();
        let Some(media_kind) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(kind_for_extension)
        else {
            continue;
        };
        let Some(content_id) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| ContentId::from_file_stem(stem).ok())
        else {
            debug!("Ignoring foreign file in cache dir: {}", path.display());
            continue;
        };

        let metadata = match dir_entry.metadata().await {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => metadata,
            _ => continue,
        };
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        entries.push(CacheEntry {
            content_id,
            local_path: path,
            size_bytes: metadata.len(),
            created_at,
            media_kind,
        });
    }

    Ok(entries)
}

fn kind_for_extension(ext: &str) -> Option<MediaKind> {
    [MediaKind::Video, MediaKind::Image, MediaKind::Audio]
        .into_iter()
        .find(|kind| kind.extension() == ext)
}
