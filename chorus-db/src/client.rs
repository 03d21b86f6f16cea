use crate::record::{CommentRecord, PostRecord};
use chorus_common::model::{
    ChorusSnowflake, ChorusSnowflakeGenerator, Id, ModelValidationError,
    comment::{Comment, CommentMarker, NewComment},
    post::{NewPost, Post, PostMarker},
};
use chorus_common::snowflake::{NodeId, SnowflakeTimeError};
use chorus_feed::service::{self, DataService, ServiceError};
use sqlx::{PgPool, query_as, query_scalar};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("Could not generate an id: {0}")]
    Snowflake(#[from] SnowflakeTimeError),
    #[error("No {kind} with id {id} exists")]
    Missing { kind: &'static str, id: u64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<ChorusSnowflakeGenerator>,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, node_id: NodeId) -> Self {
        let snowflake_generator = Mutex::new(ChorusSnowflakeGenerator::new(node_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    fn generate_snowflake(&self) -> Result<ChorusSnowflake> {
        let snowflake = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()?;
        Ok(snowflake)
    }

    /// Offset pagination over the posts, newest first.
    pub async fn fetch_posts_page(&self, page: u32, page_size: u32) -> Result<Vec<Post>> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);

        let records: Vec<PostRecord> = query_as(
            "
            SELECT
                posts.post_snowflake,
                posts.content,
                posts.media_url,
                posts.media_kind,
                posts.created_at,
                posts.likes
            FROM
                posts.posts
            ORDER BY
                posts.post_snowflake DESC
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<_, _>>()?;
        Ok(posts)
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record: Option<PostRecord> = query_as(
            "
            SELECT
                posts.post_snowflake,
                posts.content,
                posts.media_url,
                posts.media_kind,
                posts.created_at,
                posts.likes
            FROM
                posts.posts
            WHERE
                posts.post_snowflake = $1
            ",
        )
        .bind(post_id.snowflake().get().cast_signed())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    pub async fn create_post(&self, post: &NewPost) -> Result<Post> {
        let post_snowflake = self.generate_snowflake()?;

        let record: PostRecord = query_as(
            "
            INSERT INTO posts.posts (post_snowflake, content, media_url, media_kind, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                posts.post_snowflake,
                posts.content,
                posts.media_url,
                posts.media_kind,
                posts.created_at,
                posts.likes
            ",
        )
        .bind(post_snowflake.get().cast_signed())
        .bind(&post.content)
        .bind(post.media.as_ref().map(|media| media.url.as_str()))
        .bind(post.media.as_ref().map(|media| media.kind.as_str()))
        .bind(OffsetDateTime::from(post_snowflake.created_at()))
        .fetch_one(&self.pool)
        .await?;

        Ok(record.try_into()?)
    }

    /// Adds one like and returns the new count. `expected_prior` is only
    /// compared, so concurrent likes all count.
    pub async fn like_post(&self, post_id: Id<PostMarker>, expected_prior: u64) -> Result<u64> {
        let likes: Option<i64> = query_scalar(
            "
            UPDATE posts.posts
            SET likes = posts.likes + 1
            WHERE posts.post_snowflake = $1
            RETURNING posts.likes
            ",
        )
        .bind(post_id.snowflake().get().cast_signed())
        .fetch_optional(&self.pool)
        .await?;

        let likes = likes.ok_or(DbError::Missing {
            kind: "post",
            id: post_id.into(),
        })?;
        Self::check_prior("post", post_id.into(), likes, expected_prior)
    }

    pub async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>> {
        let records: Vec<CommentRecord> = query_as(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.parent_snowflake,
                comments.content,
                comments.created_at,
                comments.likes
            FROM
                posts.comments
            WHERE
                comments.post_snowflake = $1
            ORDER BY
                comments.comment_snowflake ASC
            ",
        )
        .bind(post_id.snowflake().get().cast_signed())
        .fetch_all(&self.pool)
        .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(comments)
    }

    pub async fn create_comment(&self, comment: &NewComment) -> Result<Comment> {
        let comment_snowflake = self.generate_snowflake()?;

        let record: CommentRecord = query_as(
            "
            INSERT INTO posts.comments
                (comment_snowflake, post_snowflake, parent_snowflake, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.parent_snowflake,
                comments.content,
                comments.created_at,
                comments.likes
            ",
        )
        .bind(comment_snowflake.get().cast_signed())
        .bind(comment.post.snowflake().get().cast_signed())
        .bind(
            comment
                .parent
                .map(|parent| parent.snowflake().get().cast_signed()),
        )
        .bind(&comment.content)
        .bind(OffsetDateTime::from(comment_snowflake.created_at()))
        .fetch_one(&self.pool)
        .await?;

        Ok(record.try_into()?)
    }

    pub async fn like_comment(
        &self,
        comment_id: Id<CommentMarker>,
        expected_prior: u64,
    ) -> Result<u64> {
        let likes: Option<i64> = query_scalar(
            "
            UPDATE posts.comments
            SET likes = comments.likes + 1
            WHERE comments.comment_snowflake = $1
            RETURNING comments.likes
            ",
        )
        .bind(comment_id.snowflake().get().cast_signed())
        .fetch_optional(&self.pool)
        .await?;

        let likes = likes.ok_or(DbError::Missing {
            kind: "comment",
            id: comment_id.into(),
        })?;
        Self::check_prior("comment", comment_id.into(), likes, expected_prior)
    }

    fn check_prior(kind: &'static str, id: u64, likes: i64, expected_prior: u64) -> Result<u64> {
        let likes = u64::try_from(likes).map_err(|_| ModelValidationError::NegativeLikes(likes))?;
        let prior = likes.saturating_sub(1);
        if prior != expected_prior {
            debug!(kind, id, prior, expected_prior, "Concurrent like");
        }

        Ok(likes)
    }
}

fn service_error(operation: &'static str) -> impl FnOnce(DbError) -> ServiceError {
    move |error| ServiceError::new(operation, error)
}

impl DataService for DbClient {
    async fn list_posts(&self, page: u32, page_size: u32) -> service::Result<Vec<Post>> {
        self.fetch_posts_page(page, page_size)
            .await
            .map_err(service_error("list_posts"))
    }

    async fn fetch_post(&self, id: Id<PostMarker>) -> service::Result<Option<Post>> {
        DbClient::fetch_post(self, id)
            .await
            .map_err(service_error("fetch_post"))
    }

    async fn create_post(&self, post: &NewPost) -> service::Result<Post> {
        DbClient::create_post(self, post)
            .await
            .map_err(service_error("create_post"))
    }

    async fn like_post(&self, id: Id<PostMarker>, expected_prior: u64) -> service::Result<()> {
        DbClient::like_post(self, id, expected_prior)
            .await
            .map(drop)
            .map_err(service_error("like_post"))
    }

    async fn list_comments(&self, post: Id<PostMarker>) -> service::Result<Vec<Comment>> {
        self.fetch_comments(post)
            .await
            .map_err(service_error("list_comments"))
    }

    async fn create_comment(&self, comment: &NewComment) -> service::Result<Comment> {
        DbClient::create_comment(self, comment)
            .await
            .map_err(service_error("create_comment"))
    }

    async fn like_comment(
        &self,
        id: Id<CommentMarker>,
        expected_prior: u64,
    ) -> service::Result<()> {
        DbClient::like_comment(self, id, expected_prior)
            .await
            .map(drop)
            .map_err(service_error("like_comment"))
    }
}
