//! # Archive retrieval
//!
//! Topics that leave the live store are sealed into an opaque record: the
//! topic's JSON payload plus an HMAC-SHA256 of that payload keyed by the
//! installation salt. Loading verifies the MAC before decoding, so a record
//! written under another salt, or damaged on disk, is an integrity failure
//! rather than a silently wrong topic.

use std::num::NonZeroUsize;
use std::sync::Arc;

use domains::{ArchiveSource, ForumError, Result, Topic, TopicId};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error};

use crate::cache::BoundedCache;

type HmacSha256 = Hmac<Sha256>;

const RECORD_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct SealedRecord {
    version: u8,
    /// Hex-encoded HMAC-SHA256 over `payload`.
    mac: String,
    payload: String,
}

fn keyed(topic: TopicId, salt: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(salt).map_err(|e| ForumError::Integrity {
        topic,
        reason: format!("unusable salt: {e}"),
    })
}

/// Encodes `topic` into a sealed archive record.
pub fn seal_topic(topic: &Topic, salt: &[u8]) -> Result<Vec<u8>> {
    let payload = serde_json::to_string(topic)
        .map_err(|e| ForumError::Persistence(format!("encoding topic {}: {e}", topic.id)))?;
    let mut mac = keyed(topic.id, salt)?;
    mac.update(payload.as_bytes());
    let record = SealedRecord {
        version: RECORD_VERSION,
        mac: hex::encode(mac.finalize().into_bytes()),
        payload,
    };
    serde_json::to_vec(&record)
        .map_err(|e| ForumError::Persistence(format!("encoding topic {}: {e}", topic.id)))
}

/// Verifies and decodes a sealed record. The returned topic has its
/// `archived` flag set.
pub fn open_topic(topic: TopicId, bytes: &[u8], salt: &[u8]) -> Result<Topic> {
    let integrity = |reason: String| ForumError::Integrity { topic, reason };

    let record: SealedRecord = serde_json::from_slice(bytes)
        .map_err(|e| integrity(format!("malformed record: {e}")))?;
    if record.version != RECORD_VERSION {
        return Err(integrity(format!("unsupported record version {}", record.version)));
    }
    let expected = hex::decode(&record.mac).map_err(|_| integrity("malformed checksum".into()))?;
    let mut mac = keyed(topic, salt)?;
    mac.update(record.payload.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| integrity("checksum mismatch".into()))?;

    let mut decoded: Topic = serde_json::from_str(&record.payload)
        .map_err(|e| integrity(format!("malformed payload: {e}")))?;
    if decoded.id != topic {
        return Err(integrity(format!("record holds topic {}", decoded.id)));
    }
    if decoded.posts.is_empty() {
        return Err(integrity("record holds no posts".into()));
    }
    decoded.archived = true;
    Ok(decoded)
}

/// Uncached load. `Ok(None)` when the source holds no record for `topic`.
pub async fn load_archived(source: &dyn ArchiveSource, topic: TopicId, salt: &[u8]) -> Result<Option<Topic>> {
    let Some(bytes) = source.fetch(topic).await.map_err(ForumError::persistence)? else {
        return Ok(None);
    };
    open_topic(topic, &bytes, salt).map(Some)
}

/// Cache-fronted access to the archive.
///
/// Concurrent misses for one topic may both hit the source; loads are
/// deterministic, so whichever insert lands last is as good as the first.
pub struct ArchiveRetriever {
    source: Arc<dyn ArchiveSource>,
    salt: SecretSlice<u8>,
    cache: BoundedCache<TopicId, Arc<Topic>>,
}

impl ArchiveRetriever {
    pub fn new(source: Arc<dyn ArchiveSource>, salt: SecretSlice<u8>, capacity: NonZeroUsize) -> Self {
        Self {
            source,
            salt,
            cache: BoundedCache::new(capacity),
        }
    }

    pub async fn load(&self, topic: TopicId) -> Result<Option<Arc<Topic>>> {
        if let Some(hit) = self.cache.get(&topic) {
            return Ok(Some(hit));
        }
        match load_archived(self.source.as_ref(), topic, self.salt.expose_secret()).await {
            Ok(Some(loaded)) => {
                let loaded = Arc::new(loaded);
                self.cache.put(topic, Arc::clone(&loaded));
                debug!(%topic, posts = loaded.posts.len(), "archived topic loaded");
                Ok(Some(loaded))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                error!(%topic, error = %err, "archived topic unavailable");
                Err(err)
            }
        }
    }

    /// Seals `topic` into the archive. Any cached copy is dropped so the next
    /// load reflects what was written.
    pub async fn store(&self, topic: &Topic) -> Result<()> {
        let sealed = seal_topic(topic, self.salt.expose_secret())?;
        self.source
            .store(topic.id, sealed)
            .await
            .map_err(ForumError::persistence)?;
        self.cache.remove(&topic.id);
        Ok(())
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryArchive;
    use bytes::Bytes;
    use chrono::Utc;
    use domains::{MockArchiveSource, Post};

    fn topic(id: u64) -> Topic {
        Topic {
            id: TopicId::new(id),
            subject: "old news".into(),
            posts: vec![Post {
                seq: 1,
                author: "alice".into(),
                source: "10.0.0.1".parse().unwrap(),
                message: Bytes::from_static(b"first"),
                created_at: Utc::now(),
                deleted: false,
            }],
            locked: true,
            lock_override: false,
            archived: false,
        }
    }

    fn retriever(source: Arc<MemoryArchive>, salt: &[u8]) -> ArchiveRetriever {
        ArchiveRetriever::new(source, SecretSlice::from(salt.to_vec()), NonZeroUsize::new(4).unwrap())
    }

    #[test]
    fn open_inverts_seal_and_marks_archived() {
        let original = topic(5);
        let sealed = seal_topic(&original, b"salt").unwrap();
        let opened = open_topic(TopicId::new(5), &sealed, b"salt").unwrap();
        assert!(opened.archived);
        assert_eq!(opened.posts, original.posts);
        assert!(opened.locked);
    }

    #[test]
    fn wrong_salt_is_integrity_failure() {
        let sealed = seal_topic(&topic(5), b"salt").unwrap();
        let err = open_topic(TopicId::new(5), &sealed, b"other").unwrap_err();
        assert!(matches!(err, ForumError::Integrity { ref reason, .. } if reason == "checksum mismatch"));
    }

    #[test]
    fn record_for_another_topic_is_rejected() {
        let sealed = seal_topic(&topic(5), b"salt").unwrap();
        assert!(matches!(
            open_topic(TopicId::new(6), &sealed, b"salt"),
            Err(ForumError::Integrity { .. })
        ));
    }

    #[tokio::test]
    async fn load_is_cache_fronted() {
        let source = Arc::new(MemoryArchive::default());
        let archive = retriever(source.clone(), b"salt");
        archive.store(&topic(5)).await.unwrap();

        let first = archive.load(TopicId::new(5)).await.unwrap().unwrap();
        let second = archive.load(TopicId::new(5)).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.archived);
        assert_eq!(source.fetches(), 1);
        assert_eq!(archive.cached(), 1);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let source = Arc::new(MemoryArchive::default());
        let archive = retriever(source, b"salt");
        assert!(archive.load(TopicId::new(9)).await.unwrap().is_none());
        assert_eq!(archive.cached(), 0);
    }

    #[tokio::test]
    async fn corrupt_record_is_not_cached() {
        let source = Arc::new(MemoryArchive::default());
        let archive = retriever(source.clone(), b"salt");
        archive.store(&topic(5)).await.unwrap();
        source.tamper(TopicId::new(5), |bytes| {
            let last = bytes.len() - 3;
            bytes[last] ^= 0x01;
        });

        let err = archive.load(TopicId::new(5)).await.unwrap_err();
        assert!(matches!(err, ForumError::Integrity { .. }));
        assert_eq!(archive.cached(), 0);
    }

    #[tokio::test]
    async fn source_failure_is_persistence_fault() {
        let mut source = MockArchiveSource::new();
        source
            .expect_fetch()
            .returning(|_| Err(anyhow::anyhow!("disk unplugged")));
        let archive = ArchiveRetriever::new(
            Arc::new(source),
            SecretSlice::from(b"salt".to_vec()),
            NonZeroUsize::new(2).unwrap(),
        );
        let err = archive.load(TopicId::new(1)).await.unwrap_err();
        assert!(matches!(err, ForumError::Persistence(ref m) if m.contains("disk unplugged")));
    }
}
