//! Bookkeeping for fetches in progress.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;

use super::FetchError;
use crate::content::ContentId;

pub(crate) type FetchOutcome = Result<PathBuf, FetchError>;

/// Table entry for a running fetch. Exists only while the fetch runs.
pub(crate) struct InFlightFetch {
    pub(crate) fetch_id: u64,
    pub(crate) outcome: watch::Receiver<Option<FetchOutcome>>,
    pub(crate) subscribers: Arc<AtomicUsize>,
}

/// One caller's interest in a running fetch.
///
/// Dropping it withdraws the interest without affecting the fetch.
pub(crate) struct Subscription {
    content_id: ContentId,
    receiver: watch::Receiver<Option<FetchOutcome>>,
    subscribers: Arc<AtomicUsize>,
}

impl Subscription {
    pub(crate) fn new(
        content_id: ContentId,
        receiver: watch::Receiver<Option<FetchOutcome>>,
        subscribers: Arc<AtomicUsize>,
    ) -> Self {
        subscribers.fetch_add(1, Ordering::SeqCst);
        Self {
            content_id,
            receiver,
            subscribers,
        }
    }

    /// Waits for the fetch's terminal result.
    pub(crate) async fn wait(&mut self) -> FetchOutcome {
        let lost = || FetchError::DownloadFailed {
            content_id: self.content_id.clone(),
            reason: "fetch task ended without a result".to_string(),
        };

        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(lost())),
            Err(_) => Err(lost()),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subscribers.fetch_sub(1, Ordering::SeqCst);
    }
}
