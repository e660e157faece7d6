//! # storage-adapters
//!
//! Local filesystem implementations of the `domains` ports.
//!
//! - [`JsonlTopicLog`]: append-only JSON-lines log behind the live store.
//! - [`FsArchive`]: sharded directory of sealed topic records.
//! - [`ImageThumbnailer`]: `image`-based JPEG thumbnail renderer.

pub mod fs_archive;
pub mod jsonl_log;
pub mod thumbnailer;

pub use fs_archive::FsArchive;
pub use jsonl_log::JsonlTopicLog;
pub use thumbnailer::ImageThumbnailer;
