//! The paginated post sequence and the per-post comment caches.

use crate::{
    config::FeedConfig,
    ledger::lock,
    mutation::LikeTarget,
    service::{DataService, ServiceError},
    thread::{CommentThread, assemble},
};
use chorus_common::model::{
    Id,
    comment::{Comment, CommentMarker},
    post::{Post, PostMarker},
};
use std::{
    collections::{HashMap, HashSet},
    num::NonZeroU32,
    sync::{Arc, Mutex, MutexGuard},
};
use thiserror::Error;
use tracing::{debug, warn};

pub type Result<T, E = FeedError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Post with id {0} is not in the feed.")]
    PostNotFound(Id<PostMarker>),
    #[error("Comment with id {0} is not cached.")]
    CommentNotFound(Id<CommentMarker>),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum PageOutcome {
    /// `received` posts came back, `appended` of them were new.
    Loaded { received: usize, appended: usize },
    /// The last page was already reached.
    Exhausted,
    /// Another page fetch is outstanding.
    InFlight,
    /// The feed was reloaded while this page was on its way.
    Discarded,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum CommentView {
    Ready(Vec<Comment>),
    /// A fetch for this post is already outstanding.
    Loading,
}

/// Work that was started against the store and has not settled yet.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
enum Outstanding {
    Page(u64),
    Comments(Id<PostMarker>, u64),
}

#[derive(Debug)]
struct FeedState {
    epoch: u64,
    revision: u64,
    next_ticket: u64,
    cursor: u32,
    has_more: bool,
    page_fetch: Option<u64>,
    posts: Vec<Post>,
    post_ids: HashSet<Id<PostMarker>>,
    comments: HashMap<Id<PostMarker>, Vec<Comment>>,
    comment_fetches: HashMap<Id<PostMarker>, u64>,
    comment_counts: HashMap<Id<PostMarker>, usize>,
}

impl FeedState {
    fn new() -> Self {
        Self {
            epoch: 0,
            revision: 0,
            next_ticket: 0,
            cursor: 0,
            has_more: true,
            page_fetch: None,
            posts: Vec::new(),
            post_ids: HashSet::new(),
            comments: HashMap::new(),
            comment_fetches: HashMap::new(),
            comment_counts: HashMap::new(),
        }
    }

    fn issue_ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn is_current(&self, outstanding: Outstanding) -> bool {
        match outstanding {
            Outstanding::Page(ticket) => self.page_fetch == Some(ticket),
            Outstanding::Comments(post, ticket) => {
                self.comment_fetches.get(&post) == Some(&ticket)
            }
        }
    }

    fn settle(&mut self, outstanding: Outstanding) {
        if !self.is_current(outstanding) {
            return;
        }
        match outstanding {
            Outstanding::Page(_) => self.page_fetch = None,
            Outstanding::Comments(post, _) => {
                self.comment_fetches.remove(&post);
            }
        }
    }

    /// Appends in arrival order, skipping ids the feed already holds.
    fn append(&mut self, posts: Vec<Post>) -> usize {
        let before = self.posts.len();
        for post in posts {
            if self.post_ids.insert(post.id) {
                self.posts.push(post);
            } else {
                debug!(id = %post.id, "Dropping repeated post");
            }
        }
        self.revision += 1;

        self.posts.len() - before
    }

    fn likes_mut(&mut self, target: LikeTarget) -> Result<&mut u64> {
        match target {
            LikeTarget::Post(id) => self
                .posts
                .iter_mut()
                .find(|post| post.id == id)
                .map(|post| &mut post.likes)
                .ok_or(FeedError::PostNotFound(id)),
            LikeTarget::Comment { post, comment } => self
                .comments
                .get_mut(&post)
                .and_then(|comments| comments.iter_mut().find(|c| c.id == comment))
                .map(|comment| &mut comment.likes)
                .ok_or(FeedError::CommentNotFound(comment)),
        }
    }
}

/// Clears an outstanding marker when the fetch settles, including when the
/// fetching future is dropped half way.
struct Settle<'a> {
    state: &'a Mutex<FeedState>,
    outstanding: Outstanding,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        lock(self.state).settle(self.outstanding);
    }
}

pub struct FeedStore<D> {
    data: Arc<D>,
    page_size: NonZeroU32,
    public_url: String,
    state: Mutex<FeedState>,
}

impl<D: DataService> FeedStore<D> {
    pub fn new(data: Arc<D>, config: &FeedConfig) -> Self {
        Self {
            data,
            page_size: config.page_size,
            public_url: config.public_url.trim_end_matches('/').to_owned(),
            state: Mutex::new(FeedState::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        lock(&self.state)
    }

    /// Replaces the feed with page 1. Supersedes any page fetch in flight.
    /// On failure the previous posts stay as they were.
    pub async fn load_first_page(&self) -> Result<PageOutcome> {
        let ticket = {
            let mut state = self.state();
            let ticket = state.issue_ticket();
            state.page_fetch = Some(ticket);
            ticket
        };
        let outstanding = Outstanding::Page(ticket);
        let _settle = Settle {
            state: &self.state,
            outstanding,
        };

        debug!(page_size = self.page_size.get(), "Loading first page");
        let fetched = self.data.list_posts(1, self.page_size.get()).await;

        let mut state = self.state();
        if !state.is_current(outstanding) {
            return Ok(PageOutcome::Discarded);
        }
        let posts = fetched.inspect_err(|error| warn!(%error, "First page failed to load"))?;

        let received = posts.len();
        state.epoch += 1;
        state.cursor = 1;
        state.has_more = received >= self.page_size.get() as usize;
        state.posts.clear();
        state.post_ids.clear();
        state.comments.clear();
        state.comment_fetches.clear();
        state.comment_counts.clear();
        let appended = state.append(posts);

        debug!(
            received,
            epoch = state.epoch,
            has_more = state.has_more,
            "First page loaded"
        );
        Ok(PageOutcome::Loaded { received, appended })
    }

    /// Fetches the page after the cursor and appends it.
    pub async fn load_next_page(&self) -> Result<PageOutcome> {
        let (ticket, page) = {
            let mut state = self.state();
            if !state.has_more {
                return Ok(PageOutcome::Exhausted);
            }
            if state.page_fetch.is_some() {
                return Ok(PageOutcome::InFlight);
            }
            let ticket = state.issue_ticket();
            state.page_fetch = Some(ticket);
            (ticket, state.cursor + 1)
        };
        let outstanding = Outstanding::Page(ticket);
        let _settle = Settle {
            state: &self.state,
            outstanding,
        };

        debug!(page, page_size = self.page_size.get(), "Loading next page");
        let fetched = self.data.list_posts(page, self.page_size.get()).await;

        let mut state = self.state();
        if !state.is_current(outstanding) {
            debug!(page, "Dropping page fetched before a reload");
            return Ok(PageOutcome::Discarded);
        }
        let posts =
            fetched.inspect_err(|error| warn!(page, %error, "Next page failed to load"))?;

        let received = posts.len();
        let appended = state.append(posts);
        state.cursor = page;
        state.has_more = received >= self.page_size.get() as usize;

        debug!(page, received, appended, has_more = state.has_more, "Page appended");
        Ok(PageOutcome::Loaded { received, appended })
    }

    /// Puts a freshly created post at the front. Returns `false` if the feed
    /// already holds it.
    pub fn insert_new_post(&self, post: Post) -> bool {
        let mut state = self.state();
        if !state.post_ids.insert(post.id) {
            return false;
        }
        state.comment_counts.insert(post.id, 0);
        state.posts.insert(0, post);
        state.revision += 1;

        true
    }

    /// Returns the like count before the change.
    pub fn adjust_post_likes(&self, id: Id<PostMarker>, delta: i64) -> Result<u64> {
        self.adjust_likes(LikeTarget::Post(id), delta)
            .map(|(prior, _)| prior)
    }

    /// Returns the like count before the change.
    pub fn adjust_comment_likes(
        &self,
        post: Id<PostMarker>,
        comment: Id<CommentMarker>,
        delta: i64,
    ) -> Result<u64> {
        self.adjust_likes(LikeTarget::Comment { post, comment }, delta)
            .map(|(prior, _)| prior)
    }

    /// Returns the prior count and the epoch it was read in.
    pub(crate) fn adjust_likes(&self, target: LikeTarget, delta: i64) -> Result<(u64, u64)> {
        let mut state = self.state();
        let likes = state.likes_mut(target)?;
        let prior = *likes;
        *likes = prior.saturating_add_signed(delta);
        state.revision += 1;

        Ok((prior, state.epoch))
    }

    /// Puts back a like count, unless the feed was reloaded since `epoch`.
    pub(crate) fn restore_likes(&self, target: LikeTarget, prior: u64, epoch: u64) -> bool {
        let mut state = self.state();
        if state.epoch != epoch {
            return false;
        }
        let Ok(likes) = state.likes_mut(target) else {
            return false;
        };
        *likes = prior;
        state.revision += 1;

        true
    }

    /// Cached comments of a post, fetching them on first use.
    pub async fn comments(&self, post: Id<PostMarker>) -> Result<CommentView> {
        let ticket = {
            let mut state = self.state();
            if let Some(comments) = state.comments.get(&post) {
                return Ok(CommentView::Ready(comments.clone()));
            }
            if state.comment_fetches.contains_key(&post) {
                return Ok(CommentView::Loading);
            }
            let ticket = state.issue_ticket();
            state.comment_fetches.insert(post, ticket);
            ticket
        };
        let outstanding = Outstanding::Comments(post, ticket);
        let _settle = Settle {
            state: &self.state,
            outstanding,
        };

        debug!(%post, "Fetching comments");
        let comments = self
            .data
            .list_comments(post)
            .await
            .inspect_err(|error| warn!(%post, %error, "Comments failed to load"))?;

        let mut state = self.state();
        if state.is_current(outstanding) {
            state.comment_counts.insert(post, comments.len());
            state.comments.insert(post, comments.clone());
        } else {
            debug!(%post, "Not caching comments fetched before a reload");
        }

        Ok(CommentView::Ready(comments))
    }

    /// The cached comments of a post as reply trees.
    #[must_use]
    pub fn comment_threads(&self, post: Id<PostMarker>) -> Option<Vec<CommentThread>> {
        let comments = self.state().comments.get(&post)?.clone();
        Some(assemble(comments))
    }

    /// `None` if the comments of the post were never loaded.
    #[must_use]
    pub fn has_comment(&self, post: Id<PostMarker>, comment: Id<CommentMarker>) -> Option<bool> {
        self.state()
            .comments
            .get(&post)
            .map(|comments| comments.iter().any(|c| c.id == comment))
    }

    /// Adds a created comment to its post's cache, unless the feed was
    /// reloaded since `epoch`.
    pub(crate) fn record_comment(&self, comment: Comment, epoch: u64) -> bool {
        let mut state = self.state();
        if state.epoch != epoch {
            return false;
        }

        let post = comment.post;
        if let Some(count) = state.comment_counts.get_mut(&post) {
            *count += 1;
        }
        if let Some(comments) = state.comments.get_mut(&post) {
            comments.push(comment);
        }

        true
    }

    #[must_use]
    pub fn comment_count(&self, post: Id<PostMarker>) -> Option<usize> {
        self.state().comment_counts.get(&post).copied()
    }

    /// Looks the post up in the feed first and asks the data service
    /// otherwise. A fetched post is not added to the feed.
    pub async fn open_post(&self, id: Id<PostMarker>) -> Result<Option<Post>> {
        if let Some(post) = self.post(id) {
            return Ok(Some(post));
        }

        Ok(self.data.fetch_post(id).await?)
    }

    #[must_use]
    pub fn post(&self, id: Id<PostMarker>) -> Option<Post> {
        self.state().posts.iter().find(|post| post.id == id).cloned()
    }

    #[must_use]
    pub fn posts(&self) -> Vec<Post> {
        self.state().posts.clone()
    }

    /// Runs `f` on the posts and the revision they belong to.
    pub fn with_posts<R>(&self, f: impl FnOnce(&[Post], u64) -> R) -> R {
        let state = self.state();
        f(&state.posts, state.revision)
    }

    #[must_use]
    pub fn permalink(&self, id: Id<PostMarker>) -> String {
        format!("{}/post/{id}", self.public_url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().posts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.state().has_more
    }

    #[must_use]
    pub fn is_loading_page(&self) -> bool {
        self.state().page_fetch.is_some()
    }

    #[must_use]
    pub fn cursor(&self) -> u32 {
        self.state().cursor
    }

    #[must_use]
    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    /// Bumped by every successful reload.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state().epoch
    }

    /// Bumped by every change to the posts.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.state().revision
    }
}
