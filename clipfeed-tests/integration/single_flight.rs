//! Single-flight guarantees across concurrent callers.

use std::sync::Arc;

use clipfeed_core::content::ContentId;
use clipfeed_core::fetch::FetchError;
use clipfeed_core::test_mocks::wait_until;
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use crate::support::{Harness, content, feed, started, wait_for_event};
