use crate::model::{Id, media::MediaRef};
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Post {
    pub id: Id<PostMarker>,
    /// May be empty when the post carries media.
    pub content: String,
    pub media: Option<MediaRef>,
    pub created_at: UtcDateTime,
    pub likes: u64,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct NewPost {
    pub content: String,
    pub media: Option<MediaRef>,
}
