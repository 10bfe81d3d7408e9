//! Disk cache durability across coordinator restarts and external changes,
//! including files that disappear under a running feed session.

use std::sync::Arc;

use clipfeed_core::config::ClipfeedConfig;
use clipfeed_core::content::MediaKind;
use clipfeed_core::fetch::FetchCoordinator;
use clipfeed_core::player::BindingState;
use clipfeed_core::session::SessionEvent;
use clipfeed_core::storage::DiskCache;
use clipfeed_core::test_mocks::{MockResolver, MockTransport};

use crate::support::{
    Harness, content, coordinator_at, feed, item_id, spawn_headless_session, started,
    started_or_failed, wait_for_event, wait_until_loaded, wait_until_settled,
};
