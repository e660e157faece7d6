//! Topic log stored as one JSON object per line.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use domains::{LogRecord, TopicLog};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct JsonlTopicLog {
    path: PathBuf,
    writer: Mutex<Writer>,
}

struct Writer {
    file: File,
    /// Length of the file up to the last record that was fully written.
    committed: u64,
}

impl Writer {
    /// Cuts off bytes a failed or abandoned append left past the last
    /// complete record.
    async fn discard_uncommitted(&mut self, path: &Path) -> anyhow::Result<()> {
        let len = self.file.metadata().await?.len();
        if len != self.committed {
            warn!(
                path = %path.display(),
                dropped_bytes = len.saturating_sub(self.committed),
                "discarding partial record in topic log"
            );
            self.file.set_len(self.committed).await?;
        }
        Ok(())
    }
}

impl JsonlTopicLog {
    /// Opens or creates the log at `path`.
    ///
    /// A trailing record without its newline is the remains of a write that
    /// never completed; it is cut off here so later appends start on a clean
    /// line.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .await
            .with_context(|| format!("opening topic log {}", path.display()))?;

        let existing = read_log(&path).await?;
        let mut committed = existing.len() as u64;
        if !existing.is_empty() && !existing.ends_with(b"\n") {
            let keep = existing
                .iter()
                .rposition(|b| *b == b'\n')
                .map_or(0, |pos| pos + 1);
            warn!(
                path = %path.display(),
                dropped_bytes = existing.len() - keep,
                "truncating torn record at end of topic log"
            );
            file.set_len(keep as u64).await?;
            file.sync_data().await?;
            committed = keep as u64;
        }

        info!(path = %path.display(), bytes = existing.len(), "topic log opened");
        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, committed }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_log(path: &Path) -> anyhow::Result<Vec<u8>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).with_context(|| format!("reading topic log {}", path.display())),
    }
}

#[async_trait]
impl TopicLog for JsonlTopicLog {
    async fn append(&self, record: &LogRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.discard_uncommitted(&self.path).await?;

        let written = async {
            writer.file.write_all(&line).await?;
            writer.file.flush().await?;
            writer.file.sync_data().await
        }
        .await;
        if let Err(err) = written {
            let committed = writer.committed;
            if let Err(rollback) = writer.file.set_len(committed).await {
                warn!(path = %self.path.display(), error = %rollback, "could not roll back partial append");
            }
            return Err(err).with_context(|| format!("appending to {}", self.path.display()));
        }
        writer.committed += line.len() as u64;
        Ok(())
    }

    async fn replay(&self) -> anyhow::Result<Vec<LogRecord>> {
        // Hold the writer lock so no append lands halfway through the read.
        let _guard = self.writer.lock().await;
        let bytes = read_log(&self.path).await?;
        let torn_tail = !bytes.is_empty() && !bytes.ends_with(b"\n");
        let lines: Vec<&[u8]> = bytes.split(|b| *b == b'\n').collect();
        let last = lines.len().saturating_sub(1);

        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.into_iter().enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LogRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) if torn_tail && index == last => {
                    warn!(line = index + 1, error = %err, "skipping torn record at end of topic log");
                }
                Err(err) => bail!("corrupt topic log record at line {}: {err}", index + 1),
            }
        }
        Ok(records)
    }
}
