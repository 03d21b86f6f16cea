//! Collaborators the feed engine talks to. They are injected at construction
//! so that any backend, or an in-memory fake, can stand behind them.

use crate::media::MediaUpload;
use chorus_common::model::{
    Id,
    comment::{Comment, CommentMarker, NewComment},
    media::{MediaKind, MediaRef},
    post::{NewPost, Post, PostMarker},
};
use std::{error::Error as StdError, future::Future};
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// A collaborator call that did not complete.
#[derive(Debug, Error)]
#[error("{operation} failed: {source}")]
pub struct ServiceError {
    pub operation: &'static str,
    #[source]
    pub source: BoxError,
}

impl ServiceError {
    pub fn new(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }
}

pub trait DataService: Send + Sync {
    /// Lists one page of posts, newest first. Pages are 1-based.
    fn list_posts(
        &self,
        page: u32,
        page_size: u32,
    ) -> impl Future<Output = Result<Vec<Post>>> + Send;

    fn fetch_post(&self, id: Id<PostMarker>) -> impl Future<Output = Result<Option<Post>>> + Send;

    /// The service assigns the id and creation time.
    fn create_post(&self, post: &NewPost) -> impl Future<Output = Result<Post>> + Send;

    /// `expected_prior` is the like count this client saw before liking.
    fn like_post(
        &self,
        id: Id<PostMarker>,
        expected_prior: u64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Lists every comment of a post in creation order, all threads mixed.
    fn list_comments(
        &self,
        post: Id<PostMarker>,
    ) -> impl Future<Output = Result<Vec<Comment>>> + Send;

    fn create_comment(&self, comment: &NewComment) -> impl Future<Output = Result<Comment>> + Send;

    fn like_comment(
        &self,
        id: Id<CommentMarker>,
        expected_prior: u64,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub trait MediaPipeline: Send + Sync {
    /// Stores an attachment that already passed [`crate::media::preflight`].
    fn upload_media(
        &self,
        upload: &MediaUpload,
        kind: MediaKind,
    ) -> impl Future<Output = Result<MediaRef>> + Send;
}
