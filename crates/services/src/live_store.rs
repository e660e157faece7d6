//! # Live topic store
//!
//! Authoritative collection of active topics. A single async read/write lock
//! serializes mutations; every mutation is written to the [`TopicLog`] first
//! and applied in memory only after the write succeeds, so a persistence
//! fault leaves the store unchanged.
//!
//! The write and the in-memory apply run on their own task holding the
//! write lock. A caller that stops waiting cannot leave a logged record
//! unapplied.
//!
//! Topics are held as `Arc<Topic>` and mutated copy-on-write: readers get a
//! cheap snapshot that later mutations never touch.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use domains::{
    ForumError, LogRecord, Post, PostHandle, Result, SourceAddr, Topic, TopicId, TopicLog,
    MAX_SEQUENCE, MAX_TOPIC_ID,
};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info, warn};

use crate::moderation::ModerationRecord;

struct LiveState {
    topics: BTreeMap<TopicId, Arc<Topic>>,
    /// Never reused, even after a topic is archived.
    next_id: u64,
    moderation: ModerationRecord,
}

impl LiveState {
    fn new(moderation: ModerationRecord) -> Self {
        Self {
            topics: BTreeMap::new(),
            next_id: 1,
            moderation,
        }
    }

    fn topic(&self, id: TopicId) -> Result<&Arc<Topic>> {
        self.topics.get(&id).ok_or_else(|| ForumError::topic_not_found(id))
    }

    /// Applies one record. `Err` carries the id of the topic the record
    /// cannot be applied to: one the state does not hold, or, for a
    /// creation, one it already holds.
    fn apply(&mut self, record: LogRecord) -> std::result::Result<(), TopicId> {
        match record {
            LogRecord::TopicCreated { topic, subject, post } => {
                self.next_id = self.next_id.max(topic.get() + 1);
                if self.topics.contains_key(&topic) {
                    return Err(topic);
                }
                self.topics.insert(
                    topic,
                    Arc::new(Topic {
                        id: topic,
                        subject,
                        posts: vec![post],
                        locked: false,
                        lock_override: false,
                        archived: false,
                    }),
                );
            }
            LogRecord::PostAppended { topic, post } => {
                self.topic_mut(topic)?.posts.push(post);
            }
            LogRecord::PostDeleted { topic, seq } => {
                if let Some(post) = self.topic_mut(topic)?.post_mut(seq) {
                    post.deleted = true;
                }
            }
            LogRecord::PostRestored { topic, seq } => {
                if let Some(post) = self.topic_mut(topic)?.post_mut(seq) {
                    post.deleted = false;
                }
            }
            LogRecord::LockChanged { topic, locked } => {
                self.topic_mut(topic)?.locked = locked;
            }
            LogRecord::LockOverrideChanged { topic, enabled } => {
                self.topic_mut(topic)?.lock_override = enabled;
            }
            LogRecord::AddressBlocked { addr } => {
                self.moderation.block(addr);
            }
            LogRecord::AddressUnblocked { addr } => {
                self.moderation.unblock(addr);
            }
            LogRecord::TopicArchived { topic } => {
                self.topics.remove(&topic).ok_or(topic)?;
            }
        }
        Ok(())
    }

    fn topic_mut(&mut self, id: TopicId) -> std::result::Result<&mut Topic, TopicId> {
        self.topics.get_mut(&id).map(Arc::make_mut).ok_or(id)
    }
}

pub struct LiveTopicStore {
    state: Arc<RwLock<LiveState>>,
    log: Arc<dyn TopicLog>,
}

impl LiveTopicStore {
    /// Rebuilds the live state by replaying `log`.
    pub async fn open(log: Arc<dyn TopicLog>, moderation: ModerationRecord) -> Result<Self> {
        let records = log.replay().await.map_err(ForumError::persistence)?;
        let total = records.len();
        let mut state = LiveState::new(moderation);
        let mut skipped = 0usize;
        for record in records {
            if let Err(topic) = state.apply(record) {
                skipped += 1;
                warn!(%topic, "log record does not apply to the replayed state, skipped");
            }
        }
        info!(
            records = total,
            skipped,
            live_topics = state.topics.len(),
            "live topic store opened"
        );
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            log,
        })
    }

    async fn lock(&self) -> OwnedRwLockWriteGuard<LiveState> {
        Arc::clone(&self.state).write_owned().await
    }

    /// Writes `record`, then applies it. Consumes the guard so the lock is
    /// held until the apply is done, even if the caller is dropped.
    async fn commit(&self, mut state: OwnedRwLockWriteGuard<LiveState>, record: LogRecord) -> Result<()> {
        let log = Arc::clone(&self.log);
        let writer = tokio::spawn(async move {
            if let Err(err) = log.append(&record).await {
                let reason = format!("{err:#}");
                error!(error = %reason, "topic log append failed");
                return Err(ForumError::Persistence(reason));
            }
            state.apply(record).map_err(|topic| {
                // Only reachable if validation above the commit was skipped.
                ForumError::Persistence(format!("logged record does not apply to topic {topic}"))
            })
        });
        writer
            .await
            .map_err(|err| ForumError::Persistence(format!("topic log writer failed: {err}")))?
    }

    /// Creates a topic whose single post is the opening post (sequence 1).
    pub async fn create_topic(
        &self,
        subject: &str,
        message: impl Into<Bytes>,
        author: &str,
        source: SourceAddr,
    ) -> Result<TopicId> {
        let mut state = self.lock().await;
        if state.next_id > MAX_TOPIC_ID {
            return Err(ForumError::Validation("topic id space exhausted".into()));
        }
        let id = TopicId::new(state.next_id);
        // Reserved before the write; a failed write burns the id.
        state.next_id += 1;
        let post = new_post(1, message.into(), author, source);
        self.commit(
            state,
            LogRecord::TopicCreated {
                topic: id,
                subject: subject.to_owned(),
                post,
            },
        )
        .await?;
        info!(topic = %id, %source, "topic created");
        Ok(id)
    }

    /// Appends a reply and returns its sequence number.
    pub async fn append_post(
        &self,
        topic: TopicId,
        message: impl Into<Bytes>,
        author: &str,
        source: SourceAddr,
    ) -> Result<u32> {
        let message = message.into();
        let state = self.lock().await;
        let current = state.topic(topic)?;
        if !current.accepts_replies() {
            return Err(ForumError::Locked(topic));
        }
        if current.contains_message(&message) {
            return Err(ForumError::DuplicateMessage(topic));
        }
        let seq = current.next_sequence();
        if seq > MAX_SEQUENCE {
            return Err(ForumError::Validation(format!(
                "topic {topic} has reached {MAX_SEQUENCE} posts"
            )));
        }
        let post = new_post(seq, message, author, source);
        self.commit(state, LogRecord::PostAppended { topic, post })
            .await?;
        debug!(%topic, seq, %source, "post appended");
        Ok(seq)
    }

    /// Snapshot of one live topic.
    pub async fn topic_by_id(&self, topic: TopicId) -> Option<Arc<Topic>> {
        self.state.read().await.topics.get(&topic).cloned()
    }

    /// Resolves a permalink handle against the live set.
    pub async fn post(&self, handle: PostHandle) -> Option<Post> {
        let (topic, seq) = handle.decode();
        let state = self.state.read().await;
        state.topics.get(&topic)?.post(seq).cloned()
    }

    /// Caller-side validation: rejects a message byte-identical to any post
    /// already in `topic`. Unknown topics pass.
    pub async fn check_duplicate(&self, topic: TopicId, message: &[u8]) -> Result<()> {
        let state = self.state.read().await;
        match state.topics.get(&topic) {
            Some(t) if t.contains_message(message) => Err(ForumError::DuplicateMessage(topic)),
            _ => Ok(()),
        }
    }

    /// Marks one post deleted. `Ok(false)` when the post does not resolve;
    /// deleting an already deleted post is a no-op.
    pub async fn soft_delete(&self, topic: TopicId, seq: u32) -> Result<bool> {
        self.set_deleted(topic, seq, true).await
    }

    /// Reverses [`LiveTopicStore::soft_delete`].
    pub async fn undelete(&self, topic: TopicId, seq: u32) -> Result<bool> {
        self.set_deleted(topic, seq, false).await
    }

    async fn set_deleted(&self, topic: TopicId, seq: u32, deleted: bool) -> Result<bool> {
        let state = self.lock().await;
        let Some(post) = state.topics.get(&topic).and_then(|t| t.post(seq)) else {
            return Ok(false);
        };
        if post.deleted == deleted {
            return Ok(true);
        }
        let record = if deleted {
            LogRecord::PostDeleted { topic, seq }
        } else {
            LogRecord::PostRestored { topic, seq }
        };
        self.commit(state, record).await?;
        info!(%topic, seq, deleted, "post visibility changed");
        Ok(true)
    }

    /// `Ok(false)` when the topic is not live.
    pub async fn set_locked(&self, topic: TopicId, locked: bool) -> Result<bool> {
        let state = self.lock().await;
        let Some(current) = state.topics.get(&topic) else {
            return Ok(false);
        };
        if current.locked != locked {
            self.commit(state, LogRecord::LockChanged { topic, locked })
                .await?;
            info!(%topic, locked, "topic lock changed");
        }
        Ok(true)
    }

    /// `Ok(false)` when the topic is not live.
    pub async fn set_lock_override(&self, topic: TopicId, enabled: bool) -> Result<bool> {
        let state = self.lock().await;
        let Some(current) = state.topics.get(&topic) else {
            return Ok(false);
        };
        if current.lock_override != enabled {
            self.commit(state, LogRecord::LockOverrideChanged { topic, enabled })
                .await?;
        }
        Ok(true)
    }

    pub async fn block_address(&self, addr: SourceAddr) -> Result<()> {
        let state = self.lock().await;
        if state.moderation.is_exact_blocked(addr) {
            return Ok(());
        }
        self.commit(state, LogRecord::AddressBlocked { addr })
            .await?;
        info!(%addr, "address blocked");
        Ok(())
    }

    pub async fn unblock_address(&self, addr: SourceAddr) -> Result<()> {
        let state = self.lock().await;
        if !state.moderation.is_exact_blocked(addr) {
            return Ok(());
        }
        self.commit(state, LogRecord::AddressUnblocked { addr })
            .await?;
        info!(%addr, "address unblocked");
        Ok(())
    }

    /// Exact block set first, then the configured patterns in order.
    pub async fn is_blocked(&self, addr: SourceAddr) -> bool {
        self.state.read().await.moderation.is_blocked(addr)
    }

    pub async fn is_message_blocked(&self, message: &str) -> bool {
        self.state.read().await.moderation.is_message_blocked(message)
    }

    /// Live topics ordered by most recent activity.
    pub async fn list_topics(&self, offset: usize, limit: usize, include_deleted: bool) -> Vec<Arc<Topic>> {
        let state = self.state.read().await;
        let mut topics: Vec<_> = state
            .topics
            .values()
            .filter(|t| include_deleted || !t.is_deleted())
            .cloned()
            .collect();
        drop(state);
        topics.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| b.id.cmp(&a.id))
        });
        topics.into_iter().skip(offset).take(limit).collect()
    }

    pub async fn live_count(&self, include_deleted: bool) -> usize {
        let state = self.state.read().await;
        state
            .topics
            .values()
            .filter(|t| include_deleted || !t.is_deleted())
            .count()
    }

    /// Every post written from `addr`, for the moderation page.
    pub async fn posts_by_address(&self, addr: SourceAddr) -> Vec<PostHandle> {
        let state = self.state.read().await;
        state
            .topics
            .values()
            .flat_map(|t| {
                t.posts
                    .iter()
                    .filter(move |p| p.source == addr)
                    .map(|p| t.handle(p.seq))
            })
            .collect()
    }

    /// The live topic whose newest post is oldest.
    pub async fn least_active(&self) -> Option<TopicId> {
        let state = self.state.read().await;
        state
            .topics
            .values()
            .min_by_key(|t| (t.last_activity(), t.id))
            .map(|t| t.id)
    }

    /// Drops `topic` from the live set once its cold copy is written.
    /// `Ok(None)` when the topic is not live.
    pub async fn remove_archived(&self, topic: TopicId) -> Result<Option<Arc<Topic>>> {
        let state = self.lock().await;
        let Some(current) = state.topics.get(&topic).cloned() else {
            return Ok(None);
        };
        self.commit(state, LogRecord::TopicArchived { topic })
            .await?;
        info!(%topic, "topic left the live store");
        Ok(Some(current))
    }
}

fn new_post(seq: u32, message: Bytes, author: &str, source: SourceAddr) -> Post {
    Post {
        seq,
        author: author.to_owned(),
        source,
        message,
        created_at: Utc::now(),
        deleted: false,
    }
}
