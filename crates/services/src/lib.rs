//! # services
//!
//! The forum core: live and archived topic storage, the bounded caches in
//! front of them, view building, and the thumbnail worker.

pub mod archive;
pub mod cache;
pub mod diagnostics;
pub mod forum;
pub mod live_store;
pub mod moderation;
pub mod ring_log;
pub mod thumbnail;
pub mod throttle;
pub mod view;

#[cfg(test)]
mod test_support;

pub use archive::{load_archived, ArchiveRetriever};
pub use cache::BoundedCache;
pub use diagnostics::{Diagnostics, DiagnosticsLayer};
pub use forum::{Forum, ForumSettings, FrontPage, Submission};
pub use live_store::LiveTopicStore;
pub use moderation::{ModerationError, ModerationRecord};
pub use ring_log::{LogMessage, RingLog};
pub use thumbnail::{thumbnail_path, JobState, PushOutcome, ThumbnailQueue};
pub use throttle::RequestThrottle;
pub use view::{build_page, build_permalink, build_preview, PageView, PostView, RenderContext};
