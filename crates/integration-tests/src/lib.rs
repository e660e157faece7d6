//! Shared setup for the integration tests: a forum wired to the real
//! filesystem adapters inside a caller-provided directory.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Duration;
use domains::{SourceAddr, TopicId};
use secrecy::SecretSlice;
use services::{ArchiveRetriever, Forum, ForumSettings, LiveTopicStore, ModerationRecord, RequestThrottle, Submission};
use storage_adapters::{FsArchive, JsonlTopicLog};

pub const SALT: &[u8] = b"integration-salt";

pub fn cap(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

pub fn settings() -> ForumSettings {
    ForumSettings {
        posts_per_page: cap(10),
        topics_per_page: cap(5),
        preview_posts: cap(3),
        max_live_topics: None,
    }
}

pub async fn open_store(dir: &Path) -> LiveTopicStore {
    let log = JsonlTopicLog::open(dir.join("topics.jsonl")).await.unwrap();
    LiveTopicStore::open(Arc::new(log), ModerationRecord::default())
        .await
        .unwrap()
}

pub fn archive(dir: &Path, salt: &[u8]) -> ArchiveRetriever {
    ArchiveRetriever::new(
        Arc::new(FsArchive::new(dir.join("archive"))),
        SecretSlice::from(salt.to_vec()),
        cap(16),
    )
}

pub async fn open_forum_with(dir: &Path, salt: &[u8], settings: ForumSettings) -> Forum {
    Forum::new(
        open_store(dir).await,
        archive(dir, salt),
        RequestThrottle::new(cap(128), Duration::seconds(30)),
        settings,
    )
}

pub async fn open_forum(dir: &Path) -> Forum {
    open_forum_with(dir, SALT, settings()).await
}

pub fn addr(s: &str) -> SourceAddr {
    s.parse().unwrap()
}

pub fn new_topic(subject: &str, message: &str, source: &str) -> Submission {
    Submission {
        topic: None,
        subject: subject.into(),
        message: Bytes::from(message.to_owned()),
        author: "anon".into(),
        source: addr(source),
    }
}

pub fn reply(topic: TopicId, message: &str, source: &str) -> Submission {
    Submission {
        topic: Some(topic),
        subject: String::new(),
        message: Bytes::from(message.to_owned()),
        author: "anon".into(),
        source: addr(source),
    }
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 200]))
        .save(path)
        .unwrap();
}
