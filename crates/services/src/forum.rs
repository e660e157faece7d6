//! # Forum
//!
//! Request-facing composition of the live store, the archive and the
//! throttle. The HTTP layer talks to this type only.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use domains::{ForumError, PostHandle, Result, SourceAddr, Topic, TopicId};
use tracing::{info, warn};

use crate::archive::ArchiveRetriever;
use crate::live_store::LiveTopicStore;
use crate::throttle::{fingerprint, RequestThrottle};
use crate::view::{build_page, build_permalink, build_preview, page_count, PageView};

#[derive(Debug, Clone, Copy)]
pub struct ForumSettings {
    pub posts_per_page: NonZeroUsize,
    pub topics_per_page: NonZeroUsize,
    pub preview_posts: NonZeroUsize,
    /// Once exceeded, the least recently active topics are archived.
    pub max_live_topics: Option<NonZeroUsize>,
}

/// A new topic when `topic` is `None`, otherwise a reply.
#[derive(Debug, Clone)]
pub struct Submission {
    pub topic: Option<TopicId>,
    pub subject: String,
    pub message: Bytes,
    pub author: String,
    pub source: SourceAddr,
}

#[derive(Debug, Clone)]
pub struct FrontPage {
    pub topics: Vec<PageView>,
    pub page: usize,
    pub page_count: usize,
}

pub struct Forum {
    store: LiveTopicStore,
    archive: ArchiveRetriever,
    throttle: RequestThrottle,
    settings: ForumSettings,
}

impl Forum {
    pub fn new(
        store: LiveTopicStore,
        archive: ArchiveRetriever,
        throttle: RequestThrottle,
        settings: ForumSettings,
    ) -> Self {
        Self {
            store,
            archive,
            throttle,
            settings,
        }
    }

    /// Direct access for moderation actions.
    pub fn store(&self) -> &LiveTopicStore {
        &self.store
    }

    pub fn settings(&self) -> &ForumSettings {
        &self.settings
    }

    /// Live set first, then the archive.
    pub async fn resolve(&self, topic: TopicId) -> Result<Option<Arc<Topic>>> {
        if let Some(live) = self.store.topic_by_id(topic).await {
            return Ok(Some(live));
        }
        self.archive.load(topic).await
    }

    /// `None` when the topic does not exist, or is deleted and the viewer is
    /// not an admin.
    pub async fn topic_page(&self, topic: TopicId, page: usize, is_admin: bool) -> Result<Option<PageView>> {
        let Some(found) = self.resolve(topic).await? else {
            return Ok(None);
        };
        if found.is_deleted() && !is_admin {
            return Ok(None);
        }
        Ok(Some(build_page(&found, page, self.settings.posts_per_page, is_admin)))
    }

    pub async fn permalink(&self, handle: PostHandle, is_admin: bool) -> Result<Option<PageView>> {
        let (topic, seq) = handle.decode();
        let Some(found) = self.resolve(topic).await? else {
            return Ok(None);
        };
        if found.is_deleted() && !is_admin {
            return Ok(None);
        }
        Ok(build_permalink(&found, seq, is_admin))
    }

    /// One page of the topic index, each entry a preview.
    pub async fn front_page(&self, page: usize, is_admin: bool) -> FrontPage {
        let per_page = self.settings.topics_per_page;
        let total = self.store.live_count(is_admin).await;
        let pages = page_count(total, per_page);
        let per_page = per_page.get();
        let page = page.clamp(1, pages);
        let topics = self
            .store
            .list_topics((page - 1) * per_page, per_page, is_admin)
            .await
            .iter()
            .map(|t| build_preview(t, self.settings.preview_posts, is_admin))
            .collect();
        FrontPage {
            topics,
            page,
            page_count: pages,
        }
    }

    /// Validates and writes a new topic or reply, returning the handle of
    /// the stored post.
    pub async fn submit(&self, submission: Submission, now: DateTime<Utc>) -> Result<PostHandle> {
        let Submission {
            topic,
            subject,
            message,
            author,
            source,
        } = submission;

        let subject = subject.trim();
        if message.iter().all(u8::is_ascii_whitespace) {
            return Err(ForumError::Validation("message is empty".into()));
        }
        if topic.is_none() && subject.is_empty() {
            return Err(ForumError::Validation("subject is empty".into()));
        }

        if self.store.is_blocked(source).await {
            warn!(%source, "submission from blocked address");
            return Err(ForumError::Blocked(format!("address {source}")));
        }
        let banned = {
            let text = String::from_utf8_lossy(&message);
            self.store.is_message_blocked(&text).await
                || self.store.is_message_blocked(subject).await
        };
        if banned {
            warn!(%source, "submission contains banned words");
            return Err(ForumError::Blocked("message contains banned words".into()));
        }
        if let Some(topic) = topic {
            self.store.check_duplicate(topic, &message).await?;
        }
        let Some(admission) = self.throttle.admit(&fingerprint(source, &author), now) else {
            return Err(ForumError::RateLimitExceeded(format!("address {source}")));
        };

        // A submission that is not stored does not use up the cooldown.
        let stored = match topic {
            Some(topic) => self.reply(topic, message, &author, source).await,
            None => self
                .store
                .create_topic(subject, message, &author, source)
                .await
                .map(|id| PostHandle::encode(id, 1)),
        };
        let handle = match stored {
            Ok(handle) => handle,
            Err(err) => {
                self.throttle.revoke(admission);
                return Err(err);
            }
        };
        if topic.is_none() {
            self.enforce_live_limit().await?;
        }
        Ok(handle)
    }

    async fn reply(&self, topic: TopicId, message: Bytes, author: &str, source: SourceAddr) -> Result<PostHandle> {
        let appended = self.store.append_post(topic, message, author, source).await;
        // Archived topics are read-only.
        if let Err(ForumError::NotFound(..)) = appended {
            if self.archive.load(topic).await?.is_some() {
                return Err(ForumError::Locked(topic));
            }
        }
        appended.map(|seq| PostHandle::encode(topic, seq))
    }

    /// Seals a live topic into the archive and drops it from the live set.
    /// `Ok(false)` when the topic is not live.
    pub async fn archive_topic(&self, topic: TopicId) -> Result<bool> {
        let Some(snapshot) = self.store.topic_by_id(topic).await else {
            return Ok(false);
        };
        self.archive.store(&snapshot).await?;
        let Some(removed) = self.store.remove_archived(topic).await? else {
            return Ok(false);
        };
        // Written to between the seal and the removal.
        if !Arc::ptr_eq(&snapshot, &removed) {
            self.archive.store(&removed).await?;
        }
        info!(%topic, posts = removed.posts.len(), "topic archived");
        Ok(true)
    }

    async fn enforce_live_limit(&self) -> Result<()> {
        let Some(max) = self.settings.max_live_topics else {
            return Ok(());
        };
        while self.store.live_count(true).await > max.get() {
            let Some(oldest) = self.store.least_active().await else {
                break;
            };
            self.archive_topic(oldest).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::ModerationRecord;
    use crate::test_support::{MemoryArchive, MemoryLog};
    use crate::view::RenderContext;
    use chrono::Duration;
    use secrecy::SecretSlice;

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    async fn forum_with(moderation: ModerationRecord, max_live: Option<usize>) -> Forum {
        let store = LiveTopicStore::open(Arc::new(MemoryLog::default()), moderation)
            .await
            .unwrap();
        let archive = ArchiveRetriever::new(
            Arc::new(MemoryArchive::default()),
            SecretSlice::from(b"test-salt".to_vec()),
            cap(8),
        );
        let throttle = RequestThrottle::new(cap(64), Duration::seconds(10));
        Forum::new(
            store,
            archive,
            throttle,
            ForumSettings {
                posts_per_page: cap(2),
                topics_per_page: cap(10),
                preview_posts: cap(3),
                max_live_topics: max_live.map(cap),
            },
        )
    }

    async fn forum() -> Forum {
        forum_with(ModerationRecord::default(), None).await
    }

    fn submission(topic: Option<TopicId>, message: &str, source: &str) -> Submission {
        Submission {
            topic,
            subject: "Hello".into(),
            message: Bytes::from(message.to_owned()),
            author: "anon".into(),
            source: source.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn hello_world_reply() {
        let forum = forum().await;
        let now = Utc::now();
        let op = forum
            .submit(submission(None, "World", "10.0.0.1"), now)
            .await
            .unwrap();
        let (topic, seq) = op.decode();
        assert_eq!(seq, 1);
        let reply = forum
            .submit(submission(Some(topic), "Reply", "10.0.0.2"), now)
            .await
            .unwrap();
        assert_eq!(reply, PostHandle::encode(topic, 2));

        let page = forum.topic_page(topic, 1, false).await.unwrap().unwrap();
        assert_eq!(page.subject, "Hello");
        assert_eq!(page.posts.len(), 2);
        assert_eq!(page.posts[0].context, RenderContext::Opening);
        assert_eq!(page.posts[1].message.as_ref(), b"Reply");
        assert_eq!(page.total_replies, 1);

        let link = forum.permalink(reply, false).await.unwrap().unwrap();
        assert_eq!(link.posts[0].context, RenderContext::Reference);
    }

    #[tokio::test]
    async fn rejections() {
        let mut moderation = ModerationRecord::from_rules([r"^192\.0\.2\."], ["casino"]).unwrap();
        moderation.block("198.51.100.7".parse().unwrap());
        let forum = forum_with(moderation, None).await;
        let now = Utc::now();

        let err = forum.submit(submission(None, "  ", "10.0.0.1"), now).await;
        assert!(matches!(err, Err(ForumError::Validation(_))));

        let err = forum.submit(submission(None, "hi", "192.0.2.4"), now).await;
        assert!(matches!(err, Err(ForumError::Blocked(_))));
        let err = forum.submit(submission(None, "hi", "198.51.100.7"), now).await;
        assert!(matches!(err, Err(ForumError::Blocked(_))));

        let err = forum.submit(submission(None, "casino!", "10.0.0.1"), now).await;
        assert!(matches!(err, Err(ForumError::Blocked(_))));

        let op = forum.submit(submission(None, "hi", "10.0.0.1"), now).await.unwrap();
        let err = forum
            .submit(submission(None, "again", "10.0.0.1"), now + Duration::seconds(1))
            .await;
        assert!(matches!(err, Err(ForumError::RateLimitExceeded(_))));

        let err = forum
            .submit(submission(Some(op.topic()), "hi", "10.0.0.2"), now)
            .await;
        assert_eq!(err, Err(ForumError::DuplicateMessage(op.topic())));
    }

    #[tokio::test]
    async fn archived_topic_is_served_read_only() {
        let forum = forum().await;
        let now = Utc::now();
        let op = forum.submit(submission(None, "first", "10.0.0.1"), now).await.unwrap();
        let topic = op.topic();

        assert!(forum.archive_topic(topic).await.unwrap());
        assert!(!forum.archive_topic(topic).await.unwrap());
        assert!(forum.store().topic_by_id(topic).await.is_none());

        let page = forum.topic_page(topic, 1, false).await.unwrap().unwrap();
        assert!(page.archived);
        assert_eq!(page.posts[0].message.as_ref(), b"first");

        let err = forum
            .submit(submission(Some(topic), "late", "10.0.0.2"), now)
            .await;
        assert_eq!(err, Err(ForumError::Locked(topic)));
    }

    #[tokio::test]
    async fn failed_reply_does_not_use_up_the_cooldown() {
        let forum = forum().await;
        let now = Utc::now();
        let op = forum.submit(submission(None, "op", "10.0.0.1"), now).await.unwrap();
        forum.store().set_locked(op.topic(), true).await.unwrap();

        let err = forum
            .submit(submission(Some(op.topic()), "locked out", "10.0.0.2"), now)
            .await;
        assert_eq!(err, Err(ForumError::Locked(op.topic())));
        let err = forum
            .submit(submission(Some(TopicId::new(404)), "nowhere", "10.0.0.2"), now)
            .await;
        assert!(matches!(err, Err(ForumError::NotFound(..))));

        forum
            .submit(submission(None, "elsewhere", "10.0.0.2"), now + Duration::seconds(1))
            .await
            .unwrap();
        let err = forum
            .submit(submission(None, "too soon", "10.0.0.2"), now + Duration::seconds(2))
            .await;
        assert!(matches!(err, Err(ForumError::RateLimitExceeded(_))));
    }

    #[tokio::test]
    async fn live_limit_archives_least_active() {
        let forum = forum_with(ModerationRecord::default(), Some(2)).await;
        let now = Utc::now();
        let mut topics = Vec::new();
        for n in 0..3 {
            let source = format!("10.0.1.{n}");
            let handle = forum
                .submit(submission(None, &format!("op {n}"), &source), now)
                .await
                .unwrap();
            topics.push(handle.topic());
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        assert_eq!(forum.store().live_count(true).await, 2);
        assert!(forum.store().topic_by_id(topics[0]).await.is_none());
        assert!(forum.resolve(topics[0]).await.unwrap().unwrap().archived);
    }

    #[tokio::test]
    async fn deleted_topic_hidden_from_public() {
        let forum = forum().await;
        let op = forum
            .submit(submission(None, "oops", "10.0.0.1"), Utc::now())
            .await
            .unwrap();
        forum.store().soft_delete(op.topic(), 1).await.unwrap();

        assert!(forum.topic_page(op.topic(), 1, false).await.unwrap().is_none());
        assert!(forum.topic_page(op.topic(), 1, true).await.unwrap().is_some());
        assert!(forum.permalink(op, false).await.unwrap().is_none());
        assert!(forum.front_page(1, false).await.topics.is_empty());
        assert_eq!(forum.front_page(1, true).await.topics.len(), 1);
    }

    #[tokio::test]
    async fn front_page_previews() {
        let forum = forum().await;
        let now = Utc::now();
        let op = forum.submit(submission(None, "op", "10.0.0.1"), now).await.unwrap();
        for n in 0..4 {
            let source = format!("10.0.2.{n}");
            forum
                .submit(submission(Some(op.topic()), &format!("r{n}"), &source), now)
                .await
                .unwrap();
        }

        let front = forum.front_page(7, false).await;
        assert_eq!(front.page, 1);
        assert_eq!(front.page_count, 1);
        let preview = &front.topics[0];
        let seqs: Vec<u32> = preview.posts.iter().map(|p| p.seq).collect();
        assert_eq!(seqs, [1, 4, 5]);

        let unknown = forum.topic_page(TopicId::new(999), 1, false).await.unwrap();
        assert!(unknown.is_none());
    }
}
