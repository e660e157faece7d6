//! In-memory port implementations shared by the unit tests.

use std::collections::HashMap;

use async_trait::async_trait;
use domains::{ArchiveSource, LogRecord, TopicId, TopicLog};
use parking_lot::Mutex;

#[derive(Default)]
pub struct MemoryLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLog {
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }
}

#[async_trait]
impl TopicLog for MemoryLog {
    async fn append(&self, record: &LogRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn replay(&self) -> anyhow::Result<Vec<LogRecord>> {
        Ok(self.records.lock().clone())
    }
}

#[derive(Default)]
pub struct MemoryArchive {
    records: Mutex<HashMap<TopicId, Vec<u8>>>,
    fetches: Mutex<usize>,
}

impl MemoryArchive {
    pub fn fetches(&self) -> usize {
        *self.fetches.lock()
    }

    pub fn tamper(&self, topic: TopicId, f: impl FnOnce(&mut Vec<u8>)) {
        if let Some(record) = self.records.lock().get_mut(&topic) {
            f(record);
        }
    }
}

#[async_trait]
impl ArchiveSource for MemoryArchive {
    async fn fetch(&self, topic: TopicId) -> anyhow::Result<Option<Vec<u8>>> {
        *self.fetches.lock() += 1;
        Ok(self.records.lock().get(&topic).cloned())
    }

    async fn store(&self, topic: TopicId, record: Vec<u8>) -> anyhow::Result<()> {
        self.records.lock().insert(topic, record);
        Ok(())
    }
}
