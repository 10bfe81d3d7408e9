//! Integration tests for Clipfeed
//!
//! These tests drive the cache, fetch coordinator, feed manager and player
//! registry together through the public session API, with mock remote
//! collaborators and a mock player backend.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/cache_persistence.rs"]
mod cache_persistence;
#[path = "integration/feed_session_flow.rs"]
mod feed_session_flow;
#[path = "integration/prefetch_policy.rs"]
mod prefetch_policy;
#[path = "integration/single_flight.rs"]
mod single_flight;
