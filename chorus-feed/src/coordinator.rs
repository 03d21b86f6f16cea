//! Every user-initiated change to the feed goes through here.

use crate::{
    ledger::{Interaction, InteractionLedger, LedgerError, LedgerPersistence, lock},
    media::{MediaError, MediaLimits, MediaUpload, preflight},
    mutation::{LikeTarget, PendingMutation},
    service::{DataService, MediaPipeline, ServiceError},
    store::{FeedError, FeedStore},
};
use chorus_common::model::{
    Id,
    comment::{Comment, CommentMarker, NewComment},
    media::MediaRef,
    post::{NewPost, Post, PostMarker},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type Result<T, E = MutationError> = std::result::Result<T, E>;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum ValidationError {
    #[error("A post needs text or an attachment")]
    EmptyPost,
    #[error("A comment needs text")]
    EmptyComment,
    #[error(transparent)]
    Media(#[from] MediaError),
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] ServiceError),
    #[error("{0} was already liked")]
    AlreadyLiked(LikeTarget),
    #[error("A like for {0} is still being sent")]
    LikeInFlight(LikeTarget),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentNotFound(Id<CommentMarker>),
}

impl From<FeedError> for MutationError {
    fn from(value: FeedError) -> Self {
        match value {
            FeedError::Service(error) => MutationError::Remote(error),
            FeedError::PostNotFound(id) => MutationError::PostNotFound(id),
            FeedError::CommentNotFound(id) => MutationError::CommentNotFound(id),
        }
    }
}

/// How loudly an error should be shown to the user.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Notice {
    Info,
    Warning,
    Error,
}

impl MutationError {
    #[must_use]
    pub fn notice(&self) -> Notice {
        match self {
            MutationError::AlreadyLiked(_) | MutationError::LikeInFlight(_) => Notice::Info,
            MutationError::Validation(_)
            | MutationError::PostNotFound(_)
            | MutationError::CommentNotFound(_) => Notice::Warning,
            MutationError::Remote(_) => Notice::Error,
        }
    }

    /// Whether sending the same mutation again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MutationError::Remote(_) | MutationError::LikeInFlight(_)
        )
    }
}

#[derive(Debug)]
pub struct LikeReceipt {
    pub target: LikeTarget,
    /// The count this like produced. A reload while it was being sent may
    /// have replaced the one shown in the feed.
    pub likes: u64,
    /// Set if the like is only remembered for this session.
    pub ledger_warning: Option<LedgerError>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostDraft {
    pub content: String,
    pub media: Option<MediaUpload>,
}

#[derive(Debug)]
pub struct PostReceipt {
    pub post: Post,
    /// Set if the attachment was dropped and the post went out as text only.
    pub media_warning: Option<MutationError>,
}

/// Marks a like as dispatched until it settles.
struct LikeClaim<'a> {
    in_flight: &'a Mutex<HashSet<Interaction>>,
    interaction: Interaction,
}

impl Drop for LikeClaim<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.interaction);
    }
}

pub struct MutationCoordinator<D, M, P> {
    data: Arc<D>,
    media: Arc<M>,
    store: Arc<FeedStore<D>>,
    ledger: Arc<InteractionLedger<P>>,
    limits: MediaLimits,
    in_flight: Mutex<HashSet<Interaction>>,
}

impl<D, M, P> MutationCoordinator<D, M, P>
where
    D: DataService,
    M: MediaPipeline,
    P: LedgerPersistence,
{
    pub fn new(
        data: Arc<D>,
        media: Arc<M>,
        store: Arc<FeedStore<D>>,
        ledger: Arc<InteractionLedger<P>>,
        limits: MediaLimits,
    ) -> Self {
        Self {
            data,
            media,
            store,
            ledger,
            limits,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<FeedStore<D>> {
        &self.store
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<InteractionLedger<P>> {
        &self.ledger
    }

    /// Whether the like button for `target` should be enabled.
    #[must_use]
    pub fn can_like(&self, target: LikeTarget) -> bool {
        let interaction = target.interaction();
        !self.ledger.has_liked(interaction) && !lock(&self.in_flight).contains(&interaction)
    }

    pub async fn like_post(&self, id: Id<PostMarker>) -> Result<LikeReceipt> {
        self.like(LikeTarget::Post(id)).await
    }

    pub async fn like_comment(
        &self,
        post: Id<PostMarker>,
        comment: Id<CommentMarker>,
    ) -> Result<LikeReceipt> {
        self.like(LikeTarget::Comment { post, comment }).await
    }

    /// Adds one like, shown right away and taken back if the data service
    /// refuses it. A target is liked at most once per ledger.
    pub async fn like(&self, target: LikeTarget) -> Result<LikeReceipt> {
        let interaction = target.interaction();
        // Ledger check and claim happen under one lock.
        let _claim = {
            let mut in_flight = lock(&self.in_flight);
            if self.ledger.has_liked(interaction) {
                debug!(%target, "Ignoring like, already recorded");
                return Err(MutationError::AlreadyLiked(target));
            }
            if !in_flight.insert(interaction) {
                debug!(%target, "Ignoring like, one is already being sent");
                return Err(MutationError::LikeInFlight(target));
            }
            LikeClaim {
                in_flight: &self.in_flight,
                interaction,
            }
        };

        let pending = PendingMutation::apply(&self.store, target, 1)?;
        debug!(%target, prior = pending.prior(), "Dispatching like");

        let sent = match target {
            LikeTarget::Post(id) => self.data.like_post(id, pending.prior()).await,
            LikeTarget::Comment { comment, .. } => {
                self.data.like_comment(comment, pending.prior()).await
            }
        };
        if let Err(error) = sent {
            let restored = pending.undo(&self.store);
            warn!(%target, %error, restored, "Like rolled back");
            return Err(MutationError::Remote(error));
        }

        let ledger_warning = self.ledger.record_like(interaction).await.err();
        let likes = pending.confirm();
        info!(%target, likes, "Like confirmed");

        Ok(LikeReceipt {
            target,
            likes,
            ledger_warning,
        })
    }

    /// Publishes a post and puts it at the top of the feed once the data
    /// service has assigned its id.
    pub async fn create_post(&self, draft: PostDraft) -> Result<PostReceipt> {
        let content = draft.content.trim();
        if content.is_empty() && draft.media.is_none() {
            return Err(ValidationError::EmptyPost.into());
        }

        let mut media_warning = None;
        let media = match &draft.media {
            None => None,
            Some(upload) => match self.process_media(upload).await {
                Ok(media) => Some(media),
                Err(error) if !content.is_empty() => {
                    warn!(file = %upload.file_name, %error, "Posting without the attachment");
                    media_warning = Some(error);
                    None
                }
                Err(error) => return Err(error),
            },
        };

        let post = self
            .data
            .create_post(&NewPost {
                content: content.to_owned(),
                media,
            })
            .await?;
        self.store.insert_new_post(post.clone());
        info!(id = %post.id, has_media = post.media.is_some(), "Post created");

        Ok(PostReceipt {
            post,
            media_warning,
        })
    }

    async fn process_media(&self, upload: &MediaUpload) -> Result<MediaRef> {
        let kind = preflight(upload, self.limits).map_err(ValidationError::Media)?;
        debug!(file = %upload.file_name, %kind, size = upload.size(), "Uploading media");

        Ok(self.media.upload_media(upload, kind).await?)
    }

    /// Publishes a comment and adds it to the post's cached comments, if
    /// they are loaded.
    pub async fn create_comment(
        &self,
        post: Id<PostMarker>,
        content: &str,
        parent: Option<Id<CommentMarker>>,
    ) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }
        if let Some(parent) =
            parent.filter(|parent| self.store.has_comment(post, *parent) == Some(false))
        {
            return Err(MutationError::CommentNotFound(parent));
        }

        let epoch = self.store.epoch();
        let comment = self
            .data
            .create_comment(&NewComment {
                post,
                content: content.to_owned(),
                parent,
            })
            .await?;

        if !self.store.record_comment(comment.clone(), epoch) {
            debug!(id = %comment.id, "Feed was reloaded, not caching new comment");
        }
        info!(id = %comment.id, %post, "Comment created");

        Ok(comment)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::FeedConfig,
        coordinator::{MutationCoordinator, MutationError, Notice, PostDraft, ValidationError},
        fake::{FakeDataService, FakeMediaPipeline},
        ledger::{Interaction, InteractionLedger, MemoryLedger},
        media::{MediaError, MediaLimits, MediaUpload},
        mutation::LikeTarget,
        store::FeedStore,
    };
    use chorus_common::model::{Id, media::MediaKind, post::PostMarker};
    use std::sync::Arc;

    type Coordinator = MutationCoordinator<FakeDataService, FakeMediaPipeline, MemoryLedger>;

    struct Harness {
        data: Arc<FakeDataService>,
        media: Arc<FakeMediaPipeline>,
        coordinator: Coordinator,
    }

    impl Harness {
        async fn new(data: FakeDataService) -> Self {
            Self::with_ledger(data, MemoryLedger::new()).await
        }

        async fn with_ledger(data: FakeDataService, ledger: MemoryLedger) -> Self {
            let data = Arc::new(data);
            let media = Arc::new(FakeMediaPipeline::new());
            let store = Arc::new(FeedStore::new(Arc::clone(&data), &FeedConfig::default()));
            let coordinator = MutationCoordinator::new(
                Arc::clone(&data),
                Arc::clone(&media),
                store,
                Arc::new(InteractionLedger::load(ledger).await),
                MediaLimits { max_bytes: 64 },
            );

            Self {
                data,
                media,
                coordinator,
            }
        }

        async fn loaded(data: FakeDataService) -> Self {
            let harness = Self::new(data).await;
            harness.coordinator.store().load_first_page().await.unwrap();
            harness
        }

        fn likes(&self, id: u64) -> u64 {
            self.coordinator.store().post(id.into()).unwrap().likes
        }
    }

    fn upload(content_type: &str, size: usize) -> MediaUpload {
        MediaUpload {
            file_name: "clip.bin".to_owned(),
            content_type: content_type.to_owned(),
            bytes: vec![1; size],
        }
    }

    #[tokio::test]
    async fn like_is_counted_once() {
        let harness = Harness::loaded(FakeDataService::with_posts(3)).await;
        let id: Id<PostMarker> = 2_u64.into();

        let receipt = harness.coordinator.like_post(id).await.unwrap();
        assert_eq!(receipt.likes, 1);
        assert!(receipt.ledger_warning.is_none());

        for _ in 0..3 {
            assert!(matches!(
                harness.coordinator.like_post(id).await,
                Err(MutationError::AlreadyLiked(LikeTarget::Post(_)))
            ));
        }

        assert_eq!(harness.likes(2), 1);
        assert_eq!(harness.data.calls("like_post"), 1);
        assert_eq!(harness.data.remote_post_likes(2), Some(1));
        assert!(harness.coordinator.ledger().has_liked(Interaction::Post(id)));
        assert!(!harness.coordinator.can_like(LikeTarget::Post(id)));
    }

    #[tokio::test]
    async fn rapid_likes_dispatch_once() {
        let data = FakeDataService::with_posts(3);
        data.set_yielding(true);
        let harness = Harness::loaded(data).await;
        let id: Id<PostMarker> = 3_u64.into();

        let (first, second) = tokio::join!(
            harness.coordinator.like_post(id),
            harness.coordinator.like_post(id)
        );

        assert_eq!(first.unwrap().likes, 1);
        assert!(matches!(second, Err(MutationError::LikeInFlight(_))));
        assert_eq!(harness.likes(3), 1);
        assert_eq!(harness.data.calls("like_post"), 1);
    }

    #[tokio::test]
    async fn failed_like_rolls_back() {
        let data = FakeDataService::with_posts(3);
        data.set_post_likes(1, 4);
        let harness = Harness::loaded(data).await;
        let id: Id<PostMarker> = 1_u64.into();

        harness.data.fail("like_post");
        let error = harness.coordinator.like_post(id).await.unwrap_err();

        assert!(matches!(error, MutationError::Remote(_)));
        assert!(error.is_retryable());
        assert_eq!(error.notice(), Notice::Error);
        assert_eq!(harness.likes(1), 4);
        assert!(!harness.coordinator.ledger().has_liked(Interaction::Post(id)));
        assert!(harness.coordinator.can_like(LikeTarget::Post(id)));

        harness.data.recover("like_post");
        assert_eq!(harness.coordinator.like_post(id).await.unwrap().likes, 5);
        assert_eq!(harness.data.remote_post_likes(1), Some(5));
    }

    #[tokio::test]
    async fn like_sends_the_prior_count() {
        let data = FakeDataService::with_posts(1);
        data.set_post_likes(1, 9);
        let harness = Harness::loaded(data).await;

        harness.coordinator.like_post(1_u64.into()).await.unwrap();

        assert_eq!(harness.data.last_expected_prior(), Some(9));
    }

    #[tokio::test]
    async fn liking_a_missing_post_sends_nothing() {
        let harness = Harness::loaded(FakeDataService::with_posts(1)).await;

        let error = harness.coordinator.like_post(77_u64.into()).await.unwrap_err();

        assert!(matches!(error, MutationError::PostNotFound(_)));
        assert_eq!(error.notice(), Notice::Warning);
        assert_eq!(harness.data.calls("like_post"), 0);
        assert!(harness.coordinator.can_like(LikeTarget::Post(77_u64.into())));
    }

    #[tokio::test]
    async fn like_survives_ledger_write_failure() {
        let ledger = MemoryLedger::new();
        ledger.set_fail_writes(true);
        let harness = Harness::with_ledger(FakeDataService::with_posts(1), ledger).await;
        harness.coordinator.store().load_first_page().await.unwrap();
        let id: Id<PostMarker> = 1_u64.into();

        let receipt = harness.coordinator.like_post(id).await.unwrap();

        assert!(receipt.ledger_warning.is_some());
        assert_eq!(harness.likes(1), 1);
        assert!(matches!(
            harness.coordinator.like_post(id).await,
            Err(MutationError::AlreadyLiked(_))
        ));
    }

    #[tokio::test]
    async fn comment_like_updates_the_cache() {
        let data = FakeDataService::with_posts(1);
        data.add_comment(1, 10, None);
        let harness = Harness::loaded(data).await;
        let post: Id<PostMarker> = 1_u64.into();
        harness.coordinator.store().comments(post).await.unwrap();

        let receipt = harness
            .coordinator
            .like_comment(post, 10_u64.into())
            .await
            .unwrap();

        assert_eq!(receipt.likes, 1);
        let threads = harness.coordinator.store().comment_threads(post).unwrap();
        assert_eq!(threads[0].comment().likes, 1);
        assert_eq!(harness.data.calls("like_comment"), 1);
        assert!(
            harness
                .coordinator
                .ledger()
                .has_liked(Interaction::Comment(10_u64.into()))
        );
    }

    #[tokio::test]
    async fn failed_comment_like_rolls_back() {
        let data = FakeDataService::with_posts(1);
        data.add_comment(1, 10, None);
        let harness = Harness::loaded(data).await;
        let post: Id<PostMarker> = 1_u64.into();
        let target = LikeTarget::Comment {
            post,
            comment: 10_u64.into(),
        };
        harness.coordinator.store().comments(post).await.unwrap();

        harness.data.fail("like_comment");
        let error = harness.coordinator.like(target).await.unwrap_err();

        assert!(matches!(error, MutationError::Remote(_)));
        let threads = harness.coordinator.store().comment_threads(post).unwrap();
        assert_eq!(threads[0].comment().likes, 0);
        assert!(
            !harness
                .coordinator
                .ledger()
                .has_liked(Interaction::Comment(10_u64.into()))
        );
        assert!(harness.coordinator.can_like(target));

        harness.data.recover("like_comment");
        assert_eq!(harness.coordinator.like(target).await.unwrap().likes, 1);
    }

    #[tokio::test]
    async fn rapid_comment_likes_dispatch_once() {
        let data = FakeDataService::with_posts(1);
        data.add_comment(1, 10, None);
        data.set_yielding(true);
        let harness = Harness::loaded(data).await;
        let post: Id<PostMarker> = 1_u64.into();
        harness.coordinator.store().comments(post).await.unwrap();

        let (first, second) = tokio::join!(
            harness.coordinator.like_comment(post, 10_u64.into()),
            harness.coordinator.like_comment(post, 10_u64.into())
        );

        assert_eq!(first.unwrap().likes, 1);
        assert!(matches!(
            second,
            Err(MutationError::LikeInFlight(LikeTarget::Comment { .. }))
        ));
        let threads = harness.coordinator.store().comment_threads(post).unwrap();
        assert_eq!(threads[0].comment().likes, 1);
        assert_eq!(harness.data.calls("like_comment"), 1);
    }

    #[tokio::test]
    async fn receipt_keeps_its_count_across_a_reload() {
        let data = FakeDataService::with_posts(1);
        data.set_yielding(true);
        let harness = Harness::loaded(data).await;
        harness.data.set_post_likes(1, 10);

        let (receipt, reloaded) = tokio::join!(
            harness.coordinator.like_post(1_u64.into()),
            harness.coordinator.store().load_first_page()
        );

        reloaded.unwrap();
        assert_eq!(receipt.unwrap().likes, 1);
        assert!(harness.likes(1) >= 10);
    }

    #[tokio::test]
    async fn empty_post_never_reaches_a_collaborator() {
        let harness = Harness::new(FakeDataService::with_posts(0)).await;

        for content in ["", "  \n "] {
            let error = harness
                .coordinator
                .create_post(PostDraft {
                    content: content.to_owned(),
                    media: None,
                })
                .await
                .unwrap_err();
            assert!(matches!(
                error,
                MutationError::Validation(ValidationError::EmptyPost)
            ));
        }

        assert_eq!(harness.data.total_calls(), 0);
        assert_eq!(harness.media.calls(), 0);
    }

    #[tokio::test]
    async fn created_post_goes_first() {
        let harness = Harness::loaded(FakeDataService::with_posts(2)).await;

        let receipt = harness
            .coordinator
            .create_post(PostDraft {
                content: " hello ".to_owned(),
                media: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.post.content, "hello");
        let posts = harness.coordinator.store().posts();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].id, receipt.post.id);
        assert_eq!(
            harness.coordinator.store().comment_count(receipt.post.id),
            Some(0)
        );
    }

    #[tokio::test]
    async fn post_with_media() {
        let harness = Harness::loaded(FakeDataService::with_posts(0)).await;

        let receipt = harness
            .coordinator
            .create_post(PostDraft {
                content: String::new(),
                media: Some(upload("video/mp4", 32)),
            })
            .await
            .unwrap();

        let media = receipt.post.media.unwrap();
        assert_eq!(media.kind, MediaKind::Video);
        assert!(receipt.media_warning.is_none());
        assert_eq!(harness.media.calls(), 1);
    }

    #[tokio::test]
    async fn failed_upload_degrades_to_text() {
        let harness = Harness::loaded(FakeDataService::with_posts(0)).await;
        harness.media.set_failing(true);

        let receipt = harness
            .coordinator
            .create_post(PostDraft {
                content: "still worth saying".to_owned(),
                media: Some(upload("image/png", 8)),
            })
            .await
            .unwrap();

        assert!(receipt.post.media.is_none());
        assert!(matches!(receipt.media_warning, Some(MutationError::Remote(_))));
        assert_eq!(harness.coordinator.store().len(), 1);
    }

    #[tokio::test]
    async fn rejected_media_without_text_aborts() {
        let harness = Harness::loaded(FakeDataService::with_posts(0)).await;

        let error = harness
            .coordinator
            .create_post(PostDraft {
                content: String::new(),
                media: Some(upload("image/png", 65)),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            MutationError::Validation(ValidationError::Media(MediaError::TooLarge { .. }))
        ));
        assert_eq!(harness.media.calls(), 0);
        assert_eq!(harness.data.calls("create_post"), 0);
        assert!(harness.coordinator.store().is_empty());
    }

    #[tokio::test]
    async fn comment_is_cached_and_counted() {
        let data = FakeDataService::with_posts(1);
        data.add_comment(1, 10, None);
        let harness = Harness::loaded(data).await;
        let post: Id<PostMarker> = 1_u64.into();
        harness.coordinator.store().comments(post).await.unwrap();

        let reply = harness
            .coordinator
            .create_comment(post, "agreed", Some(10_u64.into()))
            .await
            .unwrap();

        let store = harness.coordinator.store();
        assert_eq!(store.comment_count(post), Some(2));
        let threads = store.comment_threads(post).unwrap();
        assert_eq!(threads[0].replies()[0].comment().id, reply.id);
    }

    #[tokio::test]
    async fn invalid_comments_are_rejected() {
        let data = FakeDataService::with_posts(1);
        data.add_comment(1, 10, None);
        let harness = Harness::loaded(data).await;
        let post: Id<PostMarker> = 1_u64.into();
        harness.coordinator.store().comments(post).await.unwrap();

        assert!(matches!(
            harness.coordinator.create_comment(post, "   ", None).await,
            Err(MutationError::Validation(ValidationError::EmptyComment))
        ));
        assert!(matches!(
            harness
                .coordinator
                .create_comment(post, "hello?", Some(99_u64.into()))
                .await,
            Err(MutationError::CommentNotFound(_))
        ));
        assert_eq!(harness.data.calls("create_comment"), 0);
    }

    #[test]
    fn notices() {
        assert_eq!(
            MutationError::AlreadyLiked(LikeTarget::Post(1_u64.into())).notice(),
            Notice::Info
        );
        assert_eq!(
            MutationError::Validation(ValidationError::EmptyPost).notice(),
            Notice::Warning
        );
        assert!(!MutationError::CommentNotFound(1_u64.into()).is_retryable());
    }
}
