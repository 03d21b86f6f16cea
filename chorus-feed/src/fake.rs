//! In-memory collaborators for tests.

use crate::{
    ledger::lock,
    media::MediaUpload,
    service::{DataService, MediaPipeline, Result, ServiceError},
};
use chorus_common::model::{
    Id,
    comment::{Comment, CommentMarker, NewComment},
    media::{MediaKind, MediaRef},
    post::{NewPost, Post, PostMarker},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use time::macros::utc_datetime;

pub(crate) fn post(id: u64, content: &str) -> Post {
    Post {
        id: id.into(),
        content: content.to_owned(),
        media: None,
        created_at: utc_datetime!(2025-06-01 12:00),
        likes: 0,
    }
}

pub(crate) fn comment(post: u64, id: u64, parent: Option<u64>) -> Comment {
    Comment {
        id: id.into(),
        post: post.into(),
        parent: parent.map(Into::into),
        content: format!("comment {id}"),
        created_at: utc_datetime!(2025-06-01 12:00),
        likes: 0,
    }
}

#[derive(Debug, Default)]
struct FakeState {
    /// Newest first.
    posts: Vec<Post>,
    comments: Vec<Comment>,
    next_id: u64,
    failing: HashSet<&'static str>,
    calls: HashMap<&'static str, usize>,
    yielding: bool,
    page_overlap: usize,
    last_expected_prior: Option<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeDataService {
    state: Mutex<FakeState>,
}

impl FakeDataService {
    /// Posts with ids `count` down to 1, with content `post {id}`.
    pub(crate) fn with_posts(count: u64) -> Self {
        let posts = (1..=count)
            .rev()
            .map(|id| post(id, &format!("post {id}")))
            .collect();

        Self {
            state: Mutex::new(FakeState {
                posts,
                next_id: 1000,
                ..FakeState::default()
            }),
        }
    }

    pub(crate) fn add_comment(&self, post: u64, id: u64, parent: Option<u64>) {
        lock(&self.state).comments.push(comment(post, id, parent));
    }

    pub(crate) fn set_post_likes(&self, id: u64, likes: u64) {
        let id: Id<PostMarker> = id.into();
        if let Some(post) = lock(&self.state).posts.iter_mut().find(|post| post.id == id) {
            post.likes = likes;
        }
    }

    pub(crate) fn remote_post_likes(&self, id: u64) -> Option<u64> {
        let id: Id<PostMarker> = id.into();
        lock(&self.state)
            .posts
            .iter()
            .find(|post| post.id == id)
            .map(|post| post.likes)
    }

    pub(crate) fn last_expected_prior(&self) -> Option<u64> {
        lock(&self.state).last_expected_prior
    }

    pub(crate) fn fail(&self, operation: &'static str) {
        lock(&self.state).failing.insert(operation);
    }

    pub(crate) fn recover(&self, operation: &'static str) {
        lock(&self.state).failing.remove(operation);
    }

    /// Makes every call yield once, so joined calls interleave.
    pub(crate) fn set_yielding(&self, yielding: bool) {
        lock(&self.state).yielding = yielding;
    }

    /// Makes every page after the first repeat the last `overlap` posts of
    /// the page before it.
    pub(crate) fn set_page_overlap(&self, overlap: usize) {
        lock(&self.state).page_overlap = overlap;
    }

    pub(crate) fn calls(&self, operation: &str) -> usize {
        lock(&self.state).calls.get(operation).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        lock(&self.state).calls.values().sum()
    }

    /// Counts the call and fails it if requested.
    async fn enter(&self, operation: &'static str) -> Result<()> {
        let yielding = {
            let mut state = lock(&self.state);
            *state.calls.entry(operation).or_default() += 1;
            state.yielding
        };
        if yielding {
            tokio::task::yield_now().await;
        }

        if lock(&self.state).failing.contains(operation) {
            return Err(ServiceError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

impl DataService for FakeDataService {
    async fn list_posts(&self, page: u32, page_size: u32) -> Result<Vec<Post>> {
        self.enter("list_posts").await?;

        let state = lock(&self.state);
        let page_size = page_size as usize;
        let mut start = (page as usize - 1) * page_size;
        if page > 1 {
            start = start.saturating_sub(state.page_overlap);
        }

        Ok(state
            .posts
            .iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        self.enter("fetch_post").await?;

        Ok(lock(&self.state)
            .posts
            .iter()
            .find(|post| post.id == id)
            .cloned())
    }

    async fn create_post(&self, new: &NewPost) -> Result<Post> {
        self.enter("create_post").await?;

        let mut state = lock(&self.state);
        state.next_id += 1;
        let mut created = post(state.next_id, &new.content);
        created.media.clone_from(&new.media);
        state.posts.insert(0, created.clone());

        Ok(created)
    }

    async fn like_post(&self, id: Id<PostMarker>, expected_prior: u64) -> Result<()> {
        self.enter("like_post").await?;

        let mut state = lock(&self.state);
        state.last_expected_prior = Some(expected_prior);
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or_else(|| ServiceError::new("like_post", "no such post"))?;
        post.likes += 1;

        Ok(())
    }

    async fn list_comments(&self, post: Id<PostMarker>) -> Result<Vec<Comment>> {
        self.enter("list_comments").await?;

        Ok(lock(&self.state)
            .comments
            .iter()
            .filter(|comment| comment.post == post)
            .cloned()
            .collect())
    }

    async fn create_comment(&self, new: &NewComment) -> Result<Comment> {
        self.enter("create_comment").await?;

        let mut state = lock(&self.state);
        state.next_id += 1;
        let created = Comment {
            id: state.next_id.into(),
            post: new.post,
            parent: new.parent,
            content: new.content.clone(),
            ..comment(0, 0, None)
        };
        state.comments.push(created.clone());

        Ok(created)
    }

    async fn like_comment(&self, id: Id<CommentMarker>, expected_prior: u64) -> Result<()> {
        self.enter("like_comment").await?;

        let mut state = lock(&self.state);
        state.last_expected_prior = Some(expected_prior);
        let comment = state
            .comments
            .iter_mut()
            .find(|comment| comment.id == id)
            .ok_or_else(|| ServiceError::new("like_comment", "no such comment"))?;
        comment.likes += 1;

        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeMediaPipeline {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeMediaPipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl MediaPipeline for FakeMediaPipeline {
    async fn upload_media(&self, upload: &MediaUpload, kind: MediaKind) -> Result<MediaRef> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(ServiceError::new("upload_media", "injected failure"));
        }

        Ok(MediaRef {
            url: format!("https://media.example/{}", upload.file_name),
            kind,
        })
    }
}
