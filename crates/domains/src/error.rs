//! # ForumError
//!
//! Centralized error handling for the forum core.
//! Ordinary "no data" conditions are never errors: lookups return `Option`
//! and toggles return `bool`. These variants are reserved for rejected
//! mutations and genuine faults.

use thiserror::Error;

use crate::ids::TopicId;

/// The primary error type for all service-level operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ForumError {
    /// A mutation targeted a topic or post that does not resolve.
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, String),

    /// Caller-supplied input was rejected (e.g. empty subject)
    #[error("validation error: {0}")]
    Validation(String),

    /// The topic is locked and carries no lock override.
    #[error("topic {0} is locked")]
    Locked(TopicId),

    /// The message is byte-identical to a post already in the topic.
    #[error("duplicate message in topic {0}")]
    DuplicateMessage(TopicId),

    /// Moderation rejected the request (blocked address or banned word)
    #[error("blocked: {0}")]
    Blocked(String),

    /// Rate limit exceeded
    #[error("too many requests: {0}")]
    RateLimitExceeded(String),

    /// The archived record failed salt verification or could not be decoded.
    #[error("integrity failure for archived topic {topic}: {reason}")]
    Integrity { topic: TopicId, reason: String },

    /// Writing to or reading from backing storage failed.
    #[error("persistence fault: {0}")]
    Persistence(String),
}

impl ForumError {
    /// Wraps a port failure, keeping the whole context chain in the message.
    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(format!("{err:#}"))
    }

    pub fn topic_not_found(topic: TopicId) -> Self {
        Self::NotFound("topic", topic.to_string())
    }
}

/// A specialized Result type for forum logic.
pub type Result<T> = std::result::Result<T, ForumError>;
