//! Coordinating context for one feed screen.
//!
//! A session actor owns the feed resource manager and the player registry.
//! Presentation code talks to it through `FeedSessionHandle` and follows
//! progress through broadcast `SessionEvent`s. Fetches and player opens run
//! in their own tasks and report back to the actor, so no command waits on
//! the network or the disk.

pub mod actor;
pub mod commands;
pub mod handle;

pub use actor::spawn_feed_session;
pub use commands::{ItemStatus, SessionCommand, SessionEvent, SessionSnapshot};
pub use handle::FeedSessionHandle;

/// Errors returned by session handle calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Feed session has shut down")]
    Shutdown,

    #[error("Index {index} is outside the feed of {len} items")]
    IndexOutOfRange { index: usize, len: usize },
}
