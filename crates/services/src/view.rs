//! # Pagination & view builder
//!
//! Turns a stored [`Topic`] into the exact window of posts a template shows.
//! Everything here is a pure function of its arguments: the topic is borrowed
//! immutably and the presentation state lives only on the returned values.

use std::num::NonZeroUsize;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use domains::{Post, PostHandle, SourceAddr, Topic, TopicId};
use serde::Serialize;

/// How one post is presented within a particular view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderContext {
    /// The topic's anchor post heading the window.
    Opening,
    /// A single post shown on its own through a permalink.
    Reference,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostView {
    pub handle: PostHandle,
    pub seq: u32,
    pub author: String,
    /// Poster address, filled in for admin views only.
    pub source: Option<SourceAddr>,
    pub message: Bytes,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
    pub context: RenderContext,
}

impl PostView {
    fn new(topic: TopicId, post: &Post, context: RenderContext, is_admin: bool) -> Self {
        Self {
            handle: PostHandle::encode(topic, post.seq),
            seq: post.seq,
            author: post.author.clone(),
            source: is_admin.then_some(post.source),
            message: post.message.clone(),
            created_at: post.created_at,
            deleted: post.deleted,
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub topic: TopicId,
    pub subject: String,
    pub locked: bool,
    pub archived: bool,
    pub posts: Vec<PostView>,
    /// The page actually shown, after clamping.
    pub page: usize,
    pub page_count: usize,
    /// Replies visible to this viewer; the opening post is not counted and
    /// neither is its repeated copy on later pages.
    pub total_replies: usize,
    pub is_admin: bool,
}

fn effective_posts(topic: &Topic, is_admin: bool) -> Vec<&Post> {
    topic
        .posts
        .iter()
        .filter(|p| is_admin || !p.deleted)
        .collect()
}

fn page_view(topic: &Topic, posts: Vec<PostView>, page: usize, page_count: usize, visible: usize, is_admin: bool) -> PageView {
    PageView {
        topic: topic.id,
        subject: topic.subject.clone(),
        locked: topic.locked,
        archived: topic.archived,
        posts,
        page,
        page_count,
        total_replies: visible.saturating_sub(1),
        is_admin,
    }
}

/// Number of pages needed for `visible` posts; never less than one.
pub fn page_count(visible: usize, posts_per_page: NonZeroUsize) -> usize {
    visible.div_ceil(posts_per_page.get()).max(1)
}

/// Page on which post `seq` appears when nothing is hidden.
pub fn page_for_sequence(seq: u32, posts_per_page: NonZeroUsize) -> usize {
    page_count(seq as usize, posts_per_page)
}

/// Builds page `requested_page` (1-based, clamped) of `topic`.
///
/// Non-admin viewers do not see soft-deleted posts. Pages after the first
/// are prefixed with the opening post so the anchor is always visible.
pub fn build_page(topic: &Topic, requested_page: usize, posts_per_page: NonZeroUsize, is_admin: bool) -> PageView {
    let effective = effective_posts(topic, is_admin);
    let pages = page_count(effective.len(), posts_per_page);
    let page = requested_page.clamp(1, pages);
    let posts_per_page = posts_per_page.get();

    let start = ((page - 1) * posts_per_page).min(effective.len());
    let end = (page * posts_per_page).min(effective.len());

    let mut window = Vec::with_capacity(end - start + 1);
    if page > 1 {
        if let Some(anchor) = effective.first() {
            window.push(*anchor);
        }
    }
    window.extend_from_slice(&effective[start..end]);

    let posts = window
        .into_iter()
        .enumerate()
        .map(|(i, post)| {
            let context = if i == 0 {
                RenderContext::Opening
            } else {
                RenderContext::Reply
            };
            PostView::new(topic.id, post, context, is_admin)
        })
        .collect();

    page_view(topic, posts, page, pages, effective.len(), is_admin)
}

/// One-post view for a permalink. The post is flagged
/// [`RenderContext::Reference`], never `Opening`, even for sequence 1.
/// `None` when `seq` does not resolve or the post is hidden from the viewer.
pub fn build_permalink(topic: &Topic, seq: u32, is_admin: bool) -> Option<PageView> {
    let post = topic.post(seq)?;
    if post.deleted && !is_admin {
        return None;
    }
    let visible = effective_posts(topic, is_admin).len();
    let posts = vec![PostView::new(topic.id, post, RenderContext::Reference, is_admin)];
    Some(page_view(topic, posts, 1, 1, visible, is_admin))
}

/// Index-page preview: the opening post followed by the newest
/// `preview_len - 1` replies.
pub fn build_preview(topic: &Topic, preview_len: NonZeroUsize, is_admin: bool) -> PageView {
    let effective = effective_posts(topic, is_admin);
    let preview_len = preview_len.get();

    let mut window = Vec::with_capacity(preview_len.min(effective.len()));
    if let Some((anchor, replies)) = effective.split_first() {
        window.push(*anchor);
        let tail = replies.len().saturating_sub(preview_len - 1);
        window.extend_from_slice(&replies[tail..]);
    }

    let posts = window
        .into_iter()
        .enumerate()
        .map(|(i, post)| {
            let context = if i == 0 {
                RenderContext::Opening
            } else {
                RenderContext::Reply
            };
            PostView::new(topic.id, post, context, is_admin)
        })
        .collect();

    page_view(topic, posts, 1, 1, effective.len(), is_admin)
}
