//! # Identifiers
//!
//! A post is exposed to the outside world only through a [`PostHandle`]: a
//! single `u64` packing the topic id into the high bits and the post's
//! sequence number into the low [`SEQUENCE_BITS`] bits.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Low-order bits reserved for the post sequence number.
pub const SEQUENCE_BITS: u32 = 24;
/// High-order bits reserved for the topic id.
pub const TOPIC_BITS: u32 = u64::BITS - SEQUENCE_BITS;

pub const MAX_SEQUENCE: u32 = (1 << SEQUENCE_BITS) - 1;
pub const MAX_TOPIC_ID: u64 = (1 << TOPIC_BITS) - 1;

/// Monotonically assigned topic identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(u64);

impl TopicId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Opaque permalink handle for one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostHandle(u64);

impl PostHandle {
    /// Packs `(topic, seq)`.
    ///
    /// # Panics
    /// If either component exceeds its bit width. An out-of-range pair means
    /// the caller is broken; it is never truncated.
    pub fn encode(topic: TopicId, seq: u32) -> Self {
        match Self::checked_encode(topic, seq) {
            Some(handle) => handle,
            None => panic!("post handle out of range: topic {topic}, sequence {seq}"),
        }
    }

    /// Like [`PostHandle::encode`] but returns `None` for out-of-range input.
    pub fn checked_encode(topic: TopicId, seq: u32) -> Option<Self> {
        if topic.0 > MAX_TOPIC_ID || seq > MAX_SEQUENCE {
            return None;
        }
        Some(Self((topic.0 << SEQUENCE_BITS) | u64::from(seq)))
    }

    /// Total over every `u64`: any bit pattern yields some pair, which may
    /// still fail to resolve to a stored post.
    pub const fn decode(self) -> (TopicId, u32) {
        (
            TopicId(self.0 >> SEQUENCE_BITS),
            (self.0 & MAX_SEQUENCE as u64) as u32,
        )
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn topic(self) -> TopicId {
        self.decode().0
    }

    pub const fn sequence(self) -> u32 {
        self.decode().1
    }
}

impl fmt::Display for PostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PostHandle {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}
