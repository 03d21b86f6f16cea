use chorus_common::model::{
    ModelValidationError,
    comment::Comment,
    media::{MediaKind, MediaRef},
    post::Post,
};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub struct PostRecord {
    pub post_snowflake: i64,
    pub content: String,
    pub media_url: Option<String>,
    pub media_kind: Option<String>,
    pub created_at: OffsetDateTime,
    pub likes: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub parent_snowflake: Option<i64>,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub likes: i64,
}

fn likes(likes: i64) -> Result<u64, ModelValidationError> {
    u64::try_from(likes).map_err(|_| ModelValidationError::NegativeLikes(likes))
}

fn media(
    url: Option<String>,
    kind: Option<String>,
) -> Result<Option<MediaRef>, ModelValidationError> {
    match (url, kind) {
        (Some(url), Some(kind)) => Ok(Some(MediaRef {
            url,
            kind: kind.parse::<MediaKind>()?,
        })),
        (None, None) => Ok(None),
        _ => Err(ModelValidationError::IncompleteMedia),
    }
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.post_snowflake.cast_unsigned().into(),
            content: value.content,
            media: media(value.media_url, value.media_kind)?,
            created_at: value.created_at.into(),
            likes: likes(value.likes)?,
        })
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.comment_snowflake.cast_unsigned().into(),
            post: value.post_snowflake.cast_unsigned().into(),
            parent: value
                .parent_snowflake
                .map(|parent| parent.cast_unsigned().into()),
            content: value.content,
            created_at: value.created_at.into(),
            likes: likes(value.likes)?,
        })
    }
}
