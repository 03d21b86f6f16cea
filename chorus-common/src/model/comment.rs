use crate::model::{Id, post::PostMarker};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post: Id<PostMarker>,
    /// `None` for top-level comments.
    pub parent: Option<Id<CommentMarker>>,
    pub content: String,
    pub created_at: UtcDateTime,
    pub likes: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct NewComment {
    pub post: Id<PostMarker>,
    pub content: String,
    pub parent: Option<Id<CommentMarker>>,
}
