//! # Domain Models
//!
//! These structs represent the stored truth of the forum. Presentation
//! state (render context, visible counts, admin view) never lives here; the
//! view builder in `services` produces separate view values.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PostHandle, TopicId};

/// Origin network address in compact fixed-width form.
///
/// IPv4 addresses are stored IPv6-mapped so every address occupies 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceAddr([u8; 16]);

impl SourceAddr {
    pub fn to_ip(self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.0);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }

    pub const fn octets(self) -> [u8; 16] {
        self.0
    }
}

impl From<IpAddr> for SourceAddr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self(v4.to_ipv6_mapped().octets()),
            IpAddr::V6(v6) => Self(v6.octets()),
        }
    }
}

impl FromStr for SourceAddr {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<IpAddr>().map(Self::from)
    }
}

impl fmt::Display for SourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_ip().fmt(f)
    }
}

/// One message within a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// 1-based, dense within the topic.
    pub seq: u32,
    /// Opaque author identity token supplied by the session layer.
    pub author: String,
    pub source: SourceAddr,
    /// Raw message bytes exactly as submitted.
    pub message: Bytes,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

/// A discussion thread: one opening post plus zero or more replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub subject: String,
    /// Insertion order is canonical order; index 0 is the opening post.
    pub posts: Vec<Post>,
    #[serde(default)]
    pub locked: bool,
    /// Lets replies through even while `locked` is set.
    #[serde(default)]
    pub lock_override: bool,
    /// Set only on topics reloaded from cold storage.
    #[serde(skip)]
    pub archived: bool,
}

impl Topic {
    pub fn opening_post(&self) -> Option<&Post> {
        self.posts.first()
    }

    /// Looks up a post by its 1-based sequence number.
    pub fn post(&self, seq: u32) -> Option<&Post> {
        let idx = usize::try_from(seq).ok()?.checked_sub(1)?;
        self.posts.get(idx)
    }

    pub fn post_mut(&mut self, seq: u32) -> Option<&mut Post> {
        let idx = usize::try_from(seq).ok()?.checked_sub(1)?;
        self.posts.get_mut(idx)
    }

    /// Sequence number the next appended post receives.
    pub fn next_sequence(&self) -> u32 {
        // Dense and 1-based, so the count is the last sequence.
        u32::try_from(self.posts.len()).unwrap_or(u32::MAX).saturating_add(1)
    }

    /// A topic is deleted when its opening post is.
    pub fn is_deleted(&self) -> bool {
        self.opening_post().is_some_and(|p| p.deleted)
    }

    pub fn accepts_replies(&self) -> bool {
        !self.locked || self.lock_override
    }

    /// Exact byte-for-byte comparison against every post, deleted ones included.
    pub fn contains_message(&self, message: &[u8]) -> bool {
        self.posts.iter().any(|p| p.message.as_ref() == message)
    }

    pub fn handle(&self, seq: u32) -> PostHandle {
        PostHandle::encode(self.id, seq)
    }

    /// Timestamp of the newest post, used to order topic listings.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.posts.last().map(|p| p.created_at)
    }
}

/// One durable mutation of the live store.
///
/// The store writes a record before applying it in memory; replaying the
/// records in order rebuilds the live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    TopicCreated { topic: TopicId, subject: String, post: Post },
    PostAppended { topic: TopicId, post: Post },
    PostDeleted { topic: TopicId, seq: u32 },
    PostRestored { topic: TopicId, seq: u32 },
    LockChanged { topic: TopicId, locked: bool },
    LockOverrideChanged { topic: TopicId, enabled: bool },
    AddressBlocked { addr: SourceAddr },
    AddressUnblocked { addr: SourceAddr },
    /// The topic moved to cold storage and left the live set.
    TopicArchived { topic: TopicId },
}
