//! # Ports
//!
//! Any storage or media adapter must implement these traits to be wired into
//! the services. Adapters report failures as `anyhow::Error`; the services
//! translate them into [`crate::ForumError`].

use std::path::Path;

use async_trait::async_trait;

use crate::ids::TopicId;
use crate::models::LogRecord;

/// Durable, append-only log backing the live topic store.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TopicLog: Send + Sync {
    /// Durably appends one record. Returning `Ok` means the record survives
    /// a restart.
    async fn append(&self, record: &LogRecord) -> anyhow::Result<()>;

    /// Every record written so far, oldest first.
    async fn replay(&self) -> anyhow::Result<Vec<LogRecord>>;
}

/// Cold storage for topics that left the live store.
///
/// Records are opaque sealed bytes; sealing and verification happen in the
/// archive service.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// `Ok(None)` when no record exists for `topic`.
    async fn fetch(&self, topic: TopicId) -> anyhow::Result<Option<Vec<u8>>>;

    async fn store(&self, topic: TopicId, record: Vec<u8>) -> anyhow::Result<()>;
}

/// Produces a downscaled copy of an image.
///
/// Called from a blocking worker thread, never from a request thread.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ThumbnailRenderer: Send + Sync {
    fn render(&self, source: &Path, dest: &Path) -> anyhow::Result<()>;
}
