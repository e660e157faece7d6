//! # rusty-forum
//!
//! Assembles the forum core from configuration and keeps it running until
//! interrupted. The HTTP layer links against the same crates and is wired
//! separately.

use std::sync::Arc;

use anyhow::Context;
use configs::{ForumConfig, LogConfig};
use secrecy::SecretSlice;
use services::{
    ArchiveRetriever, Diagnostics, Forum, ForumSettings, LiveTopicStore, ModerationRecord,
    RequestThrottle, ThumbnailQueue,
};
use storage_adapters::{FsArchive, ImageThumbnailer, JsonlTopicLog};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = configs::load()?;

    let diagnostics = Arc::new(Diagnostics::new(cfg.log.errors_kept, cfg.log.notices_kept));
    init_tracing(&cfg.log, &diagnostics);

    let forum = build_forum(&cfg).await?;

    let (thumbnails, worker) = ThumbnailQueue::spawn(
        Arc::new(ImageThumbnailer::new(cfg.thumbnails.max_dimension)),
        cfg.thumbnails.queue_capacity,
        cfg.cache.thumbnail_tracking_capacity,
    );

    info!(
        data_dir = %cfg.data_dir.display(),
        live_topics = forum.store().live_count(true).await,
        "🚀 rusty-forum core ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!(
        pending_thumbnails = thumbnails.pending(),
        errors_seen = diagnostics.errors().len(),
        "shutting down"
    );

    // The worker exits once the last queue handle is gone.
    drop(thumbnails);
    worker.await?;
    Ok(())
}

fn init_tracing(log: &LogConfig, diagnostics: &Arc<Diagnostics>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(diagnostics.layer());
    if log.json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

async fn build_forum(cfg: &ForumConfig) -> anyhow::Result<Forum> {
    // 1. Live store, rebuilt from the topic log
    let log = JsonlTopicLog::open(cfg.topic_log_path()).await?;
    let moderation = ModerationRecord::from_rules(
        &cfg.moderation.banned_ips,
        cfg.moderation.banned_words.iter().cloned(),
    )?;
    let store = LiveTopicStore::open(Arc::new(log), moderation).await?;

    // 2. Archive behind its cache
    let archive = ArchiveRetriever::new(
        Arc::new(FsArchive::new(cfg.archive_dir())),
        SecretSlice::from(cfg.salt_bytes()),
        cfg.cache.archive_capacity,
    );

    // 3. Submission throttle
    let cooldown = chrono::Duration::from_std(std::time::Duration::from_secs(
        cfg.cache.throttle_cooldown_secs,
    ))
    .context("throttle cooldown out of range")?;
    let throttle = RequestThrottle::new(cfg.cache.throttle_capacity, cooldown);

    let settings = ForumSettings {
        posts_per_page: cfg.store.posts_per_page,
        topics_per_page: cfg.store.topics_per_page,
        preview_posts: cfg.store.preview_posts,
        max_live_topics: cfg.store.max_live_topics,
    };
    Ok(Forum::new(store, archive, throttle, settings))
}
