//! # configs
//!
//! Layered runtime configuration: built-in defaults, then an optional
//! `rusty-forum.toml` in the working directory, then `RUSTY_FORUM__*`
//! environment variables (a `.env` file is loaded first). Nested keys use a
//! double underscore, e.g. `RUSTY_FORUM__STORE__POSTS_PER_PAGE=25`.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const CONFIG_FILE: &str = "rusty-forum";
const ENV_PREFIX: &str = "RUSTY_FORUM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration could not be read: {0}")]
    Load(#[from] config::ConfigError),

    #[error("archive salt is not set (RUSTY_FORUM__SALT)")]
    MissingSalt,
}

const fn nz(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => NonZeroUsize::MIN,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
    /// Entries kept for the operator page.
    pub errors_kept: NonZeroUsize,
    pub notices_kept: NonZeroUsize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
            errors_kept: nz(100),
            notices_kept: nz(100),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub posts_per_page: NonZeroUsize,
    pub topics_per_page: NonZeroUsize,
    pub preview_posts: NonZeroUsize,
    /// Unlimited when unset.
    pub max_live_topics: Option<NonZeroUsize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            posts_per_page: nz(50),
            topics_per_page: nz(20),
            preview_posts: nz(5),
            max_live_topics: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub archive_capacity: NonZeroUsize,
    pub throttle_capacity: NonZeroUsize,
    pub throttle_cooldown_secs: u64,
    /// Finished thumbnail outcomes remembered. Queued jobs are not counted.
    pub thumbnail_tracking_capacity: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            archive_capacity: nz(256),
            throttle_capacity: nz(4096),
            throttle_cooldown_secs: 15,
            thumbnail_tracking_capacity: nz(1024),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub queue_capacity: NonZeroUsize,
    pub max_dimension: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            queue_capacity: nz(64),
            max_dimension: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Regular expressions matched against the textual client address.
    pub banned_ips: Vec<String>,
    pub banned_words: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    thumbnails: ThumbnailConfig,
    #[serde(default)]
    moderation: ModerationConfig,
    salt: Option<String>,
}

/// Not `Clone`: the salt should have a single owner.
#[derive(Debug)]
pub struct ForumConfig {
    pub data_dir: PathBuf,
    pub log: LogConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub thumbnails: ThumbnailConfig,
    pub moderation: ModerationConfig,
    /// Keys the archive record checksums. Redacted in `Debug` output.
    pub salt: SecretString,
}

impl ForumConfig {
    pub fn topic_log_path(&self) -> PathBuf {
        self.data_dir.join("topics.jsonl")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn salt_bytes(&self) -> Vec<u8> {
        self.salt.expose_secret().as_bytes().to_vec()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("moderation.banned_ips")
        .with_list_parse_key("moderation.banned_words")
        .try_parsing(true)
}

/// Loads `.env`, the optional config file and the environment.
pub fn load() -> Result<ForumConfig, ConfigError> {
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded .env");
    }
    let builder = Config::builder()
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(env_source());
    from_builder(builder)
}

fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<ForumConfig, ConfigError> {
    let raw: RawConfig = builder.build()?.try_deserialize()?;
    let salt = raw
        .salt
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingSalt)?;
    Ok(ForumConfig {
        data_dir: raw.data_dir,
        log: raw.log,
        store: raw.store,
        cache: raw.cache,
        thumbnails: raw.thumbnails,
        moderation: raw.moderation,
        salt: SecretString::new(salt.into()),
    })
}
