//! Fixed-capacity ring of timestamped messages for the operator page.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    pub at: DateTime<Utc>,
    pub text: String,
}

impl LogMessage {
    pub fn time_string(&self) -> String {
        self.at.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

struct Ring {
    slots: Vec<LogMessage>,
    /// Slot the next message is written to.
    next: usize,
}

/// Once full, every `add` overwrites the oldest message.
pub struct RingLog {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl RingLog {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            capacity,
            ring: Mutex::new(Ring {
                slots: Vec::with_capacity(capacity),
                next: 0,
            }),
        }
    }

    pub fn add(&self, text: impl Into<String>) {
        let msg = LogMessage {
            at: Utc::now(),
            text: text.into(),
        };
        let mut ring = self.ring.lock();
        let next = ring.next;
        if ring.slots.len() < self.capacity {
            ring.slots.push(msg);
        } else {
            ring.slots[next] = msg;
        }
        ring.next = (next + 1) % self.capacity;
    }

    /// Messages newest first: everything written so far until the ring first
    /// fills, then exactly `capacity` entries.
    pub fn snapshot(&self) -> Vec<LogMessage> {
        let ring = self.ring.lock();
        let len = ring.slots.len();
        (0..len)
            .map(|i| {
                let idx = (ring.next + self.capacity - 1 - i) % self.capacity;
                ring.slots[idx].clone()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
