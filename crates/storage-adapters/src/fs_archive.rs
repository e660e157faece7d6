//! Archive records on the local filesystem.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use domains::{ArchiveSource, TopicId};
use tokio::fs;
use tracing::debug;

/// One file per topic under `root`, spread over 256 shard directories.
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Generates a sharded path: "<root>/2a/42.topic"
    fn record_path(&self, topic: TopicId) -> PathBuf {
        let mut path = self.root.clone();
        path.push(format!("{:02x}", topic.get() % 256));
        path.push(format!("{topic}.topic"));
        path
    }
}

#[async_trait]
impl ArchiveSource for FsArchive {
    async fn fetch(&self, topic: TopicId) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.record_path(topic);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Writes through a temporary sibling and renames it into place, so a
    /// reader never sees a partial record.
    async fn store(&self, topic: TopicId, record: Vec<u8>) -> anyhow::Result<()> {
        let path = self.record_path(topic);
        let tmp = path.with_extension("topic.tmp");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&tmp, &record)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming into {}", path.display()))?;

        debug!(%topic, bytes = record.len(), "archive record written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchive::new(dir.path());
        archive.store(TopicId::new(42), b"sealed".to_vec()).await.unwrap();

        assert_eq!(
            archive.fetch(TopicId::new(42)).await.unwrap().as_deref(),
            Some(&b"sealed"[..])
        );
        assert!(dir.path().join("2a").join("42.topic").exists());
        assert!(!dir.path().join("2a").join("42.topic.tmp").exists());
    }

    #[tokio::test]
    async fn missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchive::new(dir.path());
        assert!(archive.fetch(TopicId::new(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchive::new(dir.path());
        archive.store(TopicId::new(1), b"old".to_vec()).await.unwrap();
        archive.store(TopicId::new(1), b"new".to_vec()).await.unwrap();
        assert_eq!(
            archive.fetch(TopicId::new(1)).await.unwrap().as_deref(),
            Some(&b"new"[..])
        );
    }
}
