//! Visibility-driven prefetching and failure surfacing.

use clipfeed_core::feed::ItemLoadState;
use clipfeed_core::session::SessionEvent;
use tokio::sync::broadcast::error::TryRecvError;

use crate::support::{
    Harness, content, feed, item_id, started, wait_for_event, wait_until_loaded,
    wait_until_settled,
};
