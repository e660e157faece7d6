//! Submission throttle keyed by a poster fingerprint.

use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use domains::SourceAddr;

use crate::cache::BoundedCache;

/// Admits at most one submission per fingerprint per cooldown window.
///
/// Only the most recently seen fingerprints are remembered; an evicted
/// fingerprint is admitted again immediately.
pub struct RequestThrottle {
    seen: BoundedCache<String, DateTime<Utc>>,
    cooldown: Duration,
}

impl RequestThrottle {
    pub fn new(capacity: NonZeroUsize, cooldown: Duration) -> Self {
        Self {
            seen: BoundedCache::new(capacity),
            cooldown,
        }
    }

    /// Records the attempt and returns `None` if it falls inside the
    /// cooldown. A rejected attempt does not extend the window.
    pub fn admit(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<Admission> {
        let cooldown = self.cooldown;
        let mut previous = None;
        let kept = self.seen.put_unless(fingerprint.to_owned(), now, |last| {
            previous = Some(*last);
            now - *last < cooldown
        });
        if kept.is_some() {
            return None;
        }
        Some(Admission {
            fingerprint: fingerprint.to_owned(),
            previous,
            at: now,
        })
    }

    /// Undoes an admission whose submission failed. Does nothing if the
    /// fingerprint has been admitted again since.
    pub fn revoke(&self, admission: Admission) {
        let Admission {
            fingerprint,
            previous,
            at,
        } = admission;
        match previous {
            Some(previous) => {
                self.seen.put_unless(fingerprint, previous, |current| *current != at);
            }
            None => {
                self.seen.remove_if(&fingerprint, |current| *current == at);
            }
        }
    }

    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

/// An admitted attempt, kept so it can be revoked.
#[derive(Debug)]
#[must_use]
pub struct Admission {
    fingerprint: String,
    previous: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
}

pub fn fingerprint(source: SourceAddr, author: &str) -> String {
    format!("{source}/{author}")
}
