//! Optimistic changes to the feed that may still have to be taken back.

use crate::{
    ledger::Interaction,
    service::DataService,
    store::{FeedStore, Result},
};
use chorus_common::model::{Id, comment::CommentMarker, post::PostMarker};
use std::fmt::Display;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum LikeTarget {
    Post(Id<PostMarker>),
    /// Comments are cached per post, so the post is needed to find them.
    Comment {
        post: Id<PostMarker>,
        comment: Id<CommentMarker>,
    },
}

impl LikeTarget {
    #[must_use]
    pub fn interaction(self) -> Interaction {
        match self {
            LikeTarget::Post(id) => Interaction::Post(id),
            LikeTarget::Comment { comment, .. } => Interaction::Comment(comment),
        }
    }
}

impl Display for LikeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.interaction(), f)
    }
}

/// A like count change already visible in the feed whose remote
/// confirmation is outstanding. Either [`confirm`](Self::confirm) or
/// [`undo`](Self::undo) it.
#[must_use]
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PendingMutation {
    target: LikeTarget,
    delta: i64,
    prior: u64,
    epoch: u64,
}

impl PendingMutation {
    pub fn apply<D: DataService>(
        store: &FeedStore<D>,
        target: LikeTarget,
        delta: i64,
    ) -> Result<Self> {
        let (prior, epoch) = store.adjust_likes(target, delta)?;

        Ok(Self {
            target,
            delta,
            prior,
            epoch,
        })
    }

    #[must_use]
    pub fn target(&self) -> LikeTarget {
        self.target
    }

    /// The count before the change.
    #[must_use]
    pub fn prior(&self) -> u64 {
        self.prior
    }

    /// The count right after the change.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.prior.saturating_add_signed(self.delta)
    }

    /// Keeps the change. Returns the count it produced.
    pub fn confirm(self) -> u64 {
        self.applied()
    }

    /// Puts the exact prior count back. A count changed by a reload since is
    /// left alone, which is reported as `false`.
    pub fn undo<D: DataService>(self, store: &FeedStore<D>) -> bool {
        store.restore_likes(self.target, self.prior, self.epoch)
    }
}
