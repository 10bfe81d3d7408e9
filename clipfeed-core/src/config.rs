//! Centralized configuration for Clipfeed.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::content::MediaKind;

/// Central configuration for all Clipfeed components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ClipfeedConfig {
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub feed: FeedConfig,
    pub player: PlayerConfig,
}

/// Disk cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one file per cached content id
    pub cache_dir: PathBuf,
    /// Media kind stored in this cache; fixes the file extension
    pub media_kind: MediaKind,
    /// Upper bound on cached bytes (None = unbounded retention)
    pub max_cache_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("clipfeed").join("media"),
            media_kind: MediaKind::Video,
            max_cache_bytes: None,
        }
    }
}

/// Remote resolution and download configuration.
///
/// No request timeout is applied by default: a slow transport only delays
/// the content id it serves.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// TCP/TLS connect timeout for media downloads
    pub connect_timeout: Duration,
    /// Whole-request timeout (None = unlimited)
    pub request_timeout: Option<Duration>,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
    /// Write buffer size for staging files
    pub write_buffer_size: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            request_timeout: None,
            user_agent: "clipfeed/0.1.0",
            write_buffer_size: 64 * 1024, // 64 KiB
        }
    }
}

/// Feed preloading policy.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Items resolved ahead of the visible one
    pub prefetch_depth: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { prefetch_depth: 1 }
    }
}

/// Player binding configuration.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Paused players kept for instant resume before the oldest is released
    pub max_inactive_bindings: usize,
    /// Restart the active item when playback finishes
    pub loop_playback: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            max_inactive_bindings: 2,
            loop_playback: true,
        }
    }
}

impl ClipfeedConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CLIPFEED_CACHE_DIR") {
            if !dir.is_empty() {
                config.cache.cache_dir = PathBuf::from(dir);
            }
        }

        if let Ok(max_bytes) = std::env::var("CLIPFEED_MAX_CACHE_BYTES") {
            if let Ok(bytes) = max_bytes.parse::<u64>() {
                config.cache.max_cache_bytes = Some(bytes);
            }
        }

        if let Ok(depth) = std::env::var("CLIPFEED_PREFETCH_DEPTH") {
            if let Ok(depth) = depth.parse::<usize>() {
                config.feed.prefetch_depth = depth;
            }
        }

        if let Ok(timeout) = std::env::var("CLIPFEED_CONNECT_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.fetch.connect_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(timeout) = std::env::var("CLIPFEED_REQUEST_TIMEOUT") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.fetch.request_timeout = Some(Duration::from_secs(seconds));
            }
        }

        if let Ok(max_players) = std::env::var("CLIPFEED_MAX_INACTIVE_PLAYERS") {
            if let Ok(count) = max_players.parse::<usize>() {
                config.player.max_inactive_bindings = count;
            }
        }

        config
    }

    /// Creates a configuration for tests rooted at `cache_dir`.
    pub fn for_testing(cache_dir: &Path) -> Self {
        Self {
            cache: CacheConfig {
                cache_dir: cache_dir.to_path_buf(),
                ..Default::default()
            },
            fetch: FetchConfig {
                connect_timeout: Duration::from_secs(1),
                request_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = ClipfeedConfig::default();

        assert_eq!(config.cache.media_kind, MediaKind::Video);
        assert_eq!(config.cache.max_cache_bytes, None);
        assert_eq!(config.feed.prefetch_depth, 1);
        assert_eq!(config.fetch.request_timeout, None);
        assert_eq!(config.fetch.write_buffer_size, 65536);
        assert_eq!(config.player.max_inactive_bindings, 2);
        assert!(config.player.loop_playback);
    }

    #[test]
    fn test_testing_preset() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClipfeedConfig::for_testing(dir.path());

        assert_eq!(config.cache.cache_dir, dir.path());
        assert!(config.fetch.request_timeout.is_some());
        assert_eq!(config.feed.prefetch_depth, 1);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("CLIPFEED_CACHE_DIR", "/tmp/clipfeed-env-test");
            std::env::set_var("CLIPFEED_MAX_CACHE_BYTES", "1048576");
            std::env::set_var("CLIPFEED_PREFETCH_DEPTH", "2");
            std::env::set_var("CLIPFEED_CONNECT_TIMEOUT", "3");
            std::env::set_var("CLIPFEED_REQUEST_TIMEOUT", "not-a-number");
            std::env::set_var("CLIPFEED_MAX_INACTIVE_PLAYERS", "4");
        }

        let config = ClipfeedConfig::from_env();

        assert_eq!(
            config.cache.cache_dir,
            PathBuf::from("/tmp/clipfeed-env-test")
        );
        assert_eq!(config.cache.max_cache_bytes, Some(1_048_576));
        assert_eq!(config.feed.prefetch_depth, 2);
        assert_eq!(config.fetch.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.fetch.request_timeout, None);
        assert_eq!(config.player.max_inactive_bindings, 4);

        // Cleanup
        unsafe {
            std::env::remove_var("CLIPFEED_CACHE_DIR");
            std::env::remove_var("CLIPFEED_MAX_CACHE_BYTES");
            std::env::remove_var("CLIPFEED_PREFETCH_DEPTH");
            std::env::remove_var("CLIPFEED_CONNECT_TIMEOUT");
            std::env::remove_var("CLIPFEED_REQUEST_TIMEOUT");
            std::env::remove_var("CLIPFEED_MAX_INACTIVE_PLAYERS");
        }
    }
}
