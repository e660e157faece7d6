//! # Thumbnail queue
//!
//! Request handlers push image paths that lack a thumbnail and carry on
//! serving the original. A single background task drains a bounded channel
//! and renders each thumbnail next to its source.
//!
//! Queued and running jobs are tracked in a map that is never evicted; it
//! holds at most one entry per channel slot plus the job being rendered.
//! Finished outcomes go to a [`BoundedCache`]. Every push decision and every
//! worker transition happens under the in-flight map's lock.

use std::collections::HashMap;
use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use domains::ThumbnailRenderer;
use mime_guess::mime;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::BoundedCache;

const THUMBNAIL_SUFFIX: &str = ".thumb.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Enqueued,
    Processing,
    Done,
    /// Rendering failed. The path is not retried while this entry is tracked.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A new job was queued.
    Enqueued,
    /// A job for this path is already queued or running.
    InFlight,
    /// The thumbnail already exists.
    Ready,
    /// An earlier attempt failed.
    Failed,
    /// Not an image type the renderer handles.
    Unsupported,
    /// The channel was full; the job was discarded.
    Dropped,
}

/// Deterministic sibling path of a source image's thumbnail.
pub fn thumbnail_path(source: &Path) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(THUMBNAIL_SUFFIX);
    PathBuf::from(name)
}

fn is_thumbnailable(source: &Path) -> bool {
    if source.to_string_lossy().ends_with(THUMBNAIL_SUFFIX) {
        return false;
    }
    mime_guess::from_path(source)
        .first()
        .is_some_and(|m| m.type_() == mime::IMAGE && m.subtype() != mime::SVG)
}

struct JobTable {
    /// `Enqueued` and `Processing` entries only.
    in_flight: Mutex<HashMap<PathBuf, JobState>>,
    /// `Done` and `Failed` entries only.
    finished: BoundedCache<PathBuf, JobState>,
}

impl JobTable {
    fn state(&self, source: &Path) -> Option<JobState> {
        let in_flight = self.in_flight.lock();
        in_flight
            .get(source)
            .copied()
            .or_else(|| self.finished.get(&source.to_path_buf()))
    }

    fn start(&self, source: &Path) {
        if let Some(state) = self.in_flight.lock().get_mut(source) {
            *state = JobState::Processing;
        }
    }

    fn finish(&self, source: &Path, outcome: JobState) {
        let mut in_flight = self.in_flight.lock();
        self.finished.put(source.to_path_buf(), outcome);
        in_flight.remove(source);
    }
}

#[derive(Clone)]
pub struct ThumbnailQueue {
    tx: mpsc::Sender<PathBuf>,
    jobs: Arc<JobTable>,
}

impl ThumbnailQueue {
    /// Starts the consumer task. It runs until every clone of the returned
    /// queue has been dropped.
    pub fn spawn(
        renderer: Arc<dyn ThumbnailRenderer>,
        queue_capacity: NonZeroUsize,
        tracking_capacity: NonZeroUsize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.get());
        let jobs = Arc::new(JobTable {
            in_flight: Mutex::new(HashMap::new()),
            finished: BoundedCache::new(tracking_capacity),
        });
        let worker = tokio::spawn(run_worker(rx, Arc::clone(&jobs), renderer));
        (Self { tx, jobs }, worker)
    }

    /// Never blocks. See [`PushOutcome`] for what happened to the request.
    pub fn push(&self, source: &Path) -> PushOutcome {
        if !is_thumbnailable(source) {
            return PushOutcome::Unsupported;
        }

        let mut in_flight = self.jobs.in_flight.lock();
        if in_flight.contains_key(source) {
            return PushOutcome::InFlight;
        }
        // Checked under the lock: the worker records `Done` only after the
        // file is written, and does so under the same lock.
        if thumbnail_path(source).exists() {
            return PushOutcome::Ready;
        }
        // A `Done` entry whose file has gone missing is queued again.
        if self.jobs.finished.get(&source.to_path_buf()) == Some(JobState::Failed) {
            return PushOutcome::Failed;
        }

        match self.tx.try_send(source.to_path_buf()) {
            Ok(()) => {
                in_flight.insert(source.to_path_buf(), JobState::Enqueued);
                debug!(path = %source.display(), "thumbnail job queued");
                PushOutcome::Enqueued
            }
            Err(TrySendError::Full(path)) => {
                warn!(path = %path.display(), "thumbnail queue full, job dropped");
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(path)) => {
                error!(path = %path.display(), "thumbnail worker has stopped");
                PushOutcome::Dropped
            }
        }
    }

    pub fn state(&self, source: &Path) -> Option<JobState> {
        self.jobs.state(source)
    }

    /// Jobs waiting in the channel.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<PathBuf>,
    jobs: Arc<JobTable>,
    renderer: Arc<dyn ThumbnailRenderer>,
) {
    info!("thumbnail worker started");
    while let Some(source) = rx.recv().await {
        jobs.start(&source);

        let dest = thumbnail_path(&source);
        let renderer = Arc::clone(&renderer);
        let job_source = source.clone();
        let result = tokio::task::spawn_blocking(move || renderer.render(&job_source, &dest)).await;

        match result {
            Ok(Ok(())) => {
                jobs.finish(&source, JobState::Done);
                debug!(path = %source.display(), "thumbnail generated");
            }
            Ok(Err(err)) => {
                jobs.finish(&source, JobState::Failed);
                warn!(path = %source.display(), error = %format!("{err:#}"), "thumbnail generation failed");
            }
            Err(err) => {
                jobs.finish(&source, JobState::Failed);
                error!(path = %source.display(), error = %err, "thumbnail task aborted");
            }
        }
    }
    info!("thumbnail worker stopped");
}
