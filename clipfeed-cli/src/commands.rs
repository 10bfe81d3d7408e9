//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Subcommand;
use clipfeed_core::config::ClipfeedConfig;
use clipfeed_core::content::{ContentId, UserId};
use clipfeed_core::feed::{ItemLoadState, load_user_feed};
use clipfeed_core::fetch::FetchCoordinator;
use clipfeed_core::player::HeadlessPlayerBackend;
use clipfeed_core::remote::{HttpTransport, JsonFeedSource, StaticSession, TemplateResolver};
use clipfeed_core::session::{SessionEvent, spawn_feed_session};
use clipfeed_core::storage::DiskCache;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::warn;

/// Longest wait for one item while warming.
const WARM_ITEM_TIMEOUT: Duration = Duration::from_secs(120);

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve content ids to local files, downloading when needed
    Resolve {
        /// Media URL template containing `{id}`
        #[arg(long)]
        url_template: String,
        /// Content ids to resolve
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Walk a user's feed as a viewer would, warming the cache
    Warm {
        /// Media URL template containing `{id}`
        #[arg(long)]
        url_template: String,
        /// JSON file with feed items
        #[arg(long)]
        feed: PathBuf,
        /// User whose feed is walked
        #[arg(long)]
        user: String,
        /// First visible position
        #[arg(long, default_value = "0")]
        start: usize,
        /// Number of positions to visit
        #[arg(long, default_value = "5")]
        count: usize,
    },
    /// List cached media
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove all cached media
    Clear,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the first failure of the command
pub async fn handle_command(command: Commands, cache_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = ClipfeedConfig::from_env();
    if let Some(dir) = cache_dir {
        config.cache.cache_dir = dir;
    }

    match command {
        Commands::Resolve { url_template, ids } => resolve_ids(config, url_template, ids).await,
        Commands::Warm {
            url_template,
            feed,
            user,
            start,
            count,
        } => warm_feed(config, url_template, feed, user, start, count).await,
        Commands::List { json } => list_entries(config, json).await,
        Commands::Clear => clear_cache(config).await,
    }
}

async fn build_coordinator(
    config: &ClipfeedConfig,
    url_template: String,
) -> anyhow::Result<FetchCoordinator> {
    let cache = DiskCache::open(&config.cache)
        .await
        .context("opening media cache")?
        .with_write_buffer_size(config.fetch.write_buffer_size);
    let resolver = TemplateResolver::new(url_template)?;
    let transport = HttpTransport::new(&config.fetch)?;

    Ok(FetchCoordinator::new(
        Arc::new(cache),
        Arc::new(resolver),
        Arc::new(transport),
        config.cache.media_kind,
    ))
}

/// Resolve ids concurrently and print where each landed
///
/// # Errors
/// - Invalid content id or URL template
/// - Any id failed to resolve
pub async fn resolve_ids(
    config: ClipfeedConfig,
    url_template: String,
    ids: Vec<String>,
) -> anyhow::Result<()> {
    let coordinator = build_coordinator(&config, url_template).await?;

    let mut tasks = JoinSet::new();
    for raw in ids {
        let content_id = ContentId::new(raw)?;
        let coordinator = coordinator.clone();
        tasks.spawn(async move {
            let result = coordinator.resolve(&content_id).await;
            (content_id, result)
        });
    }

    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        let (content_id, result) = joined?;
        match result {
            Ok(path) => println!("{content_id} -> {}", path.display()),
            Err(e) => {
                failures += 1;
                println!("{content_id} failed: {e}");
            }
        }
    }

    let stats = coordinator.stats();
    println!(
        "cache hits: {}, downloads: {}, failed: {}",
        stats.cache_hits, stats.downloads_started, stats.downloads_failed
    );

    if failures > 0 {
        bail!("{failures} content ids could not be resolved");
    }
    Ok(())
}

/// Walk the feed through a headless session and report item states
///
/// # Errors
/// - Feed file missing or malformed
/// - Session stopped unexpectedly
pub async fn warm_feed(
    config: ClipfeedConfig,
    url_template: String,
    feed: PathBuf,
    user: String,
    start: usize,
    count: usize,
) -> anyhow::Result<()> {
    let coordinator = build_coordinator(&config, url_template).await?;

    let auth = StaticSession::logged_in(UserId::new(user));
    let source = JsonFeedSource::new(&feed);
    let items = load_user_feed(&auth, &source).await?;
    if items.is_empty() {
        println!("Feed is empty");
        return Ok(());
    }

    let session = spawn_feed_session(config, coordinator, Arc::new(HeadlessPlayerBackend));
    let mut events = session.subscribe();
    session.replace_feed(items).await?;

    let end = start.saturating_add(count);
    let len = session.snapshot().await?.items.len();
    for index in start..end.min(len) {
        let item_id = session.set_visible(index).await?;
        let outcome = tokio::time::timeout(WARM_ITEM_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::PlaybackStarted { item_id: id }) if id == item_id => {
                        return Some("playing".to_string());
                    }
                    Ok(SessionEvent::ItemFailed {
                        item_id: id,
                        reason,
                        ..
                    }) if id == item_id => return Some(format!("failed: {reason}")),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;

        match outcome {
            Ok(Some(state)) => println!("[{index}] {item_id}: {state}"),
            Ok(None) => bail!("session stopped while warming"),
            Err(_) => warn!("Timed out waiting for {}", item_id),
        }
    }

    let snapshot = session.snapshot().await?;
    session.shutdown().await?;

    for status in snapshot.items {
        let load = match status.load {
            ItemLoadState::Idle => "idle".to_string(),
            ItemLoadState::Loading => "loading".to_string(),
            ItemLoadState::Ready(path) => format!("cached at {}", path.display()),
            ItemLoadState::Failed(e) => format!("failed ({e})"),
        };
        println!("{} ({}): {load}", status.item_id, status.content_id);
    }

    Ok(())
}

/// Print cache entries
///
/// # Errors
/// - Cache directory cannot be opened
pub async fn list_entries(config: ClipfeedConfig, json: bool) -> anyhow::Result<()> {
    let cache = DiskCache::open(&config.cache).await?;
    let mut entries = cache.entries();
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Cache at {} is empty", cache.root().display());
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  {:>10}  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.size_bytes,
            entry.content_id,
            entry.local_path.display()
        );
    }
    let stats = cache.stats();
    println!("{} entries, {} bytes", stats.entries, stats.total_bytes);

    Ok(())
}

/// Remove every cached file
///
/// # Errors
/// - Cache directory cannot be opened or a file cannot be removed
pub async fn clear_cache(config: ClipfeedConfig) -> anyhow::Result<()> {
    let cache = DiskCache::open(&config.cache).await?;
    let removed = cache.evict_all().await?;
    println!("Removed {removed} cached files from {}", cache.root().display());
    Ok(())
}
