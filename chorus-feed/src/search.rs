use crate::{service::DataService, store::FeedStore};
use chorus_common::model::post::Post;

/// A case-insensitive substring filter over the feed. The feed itself is
/// never touched.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct SearchFilter {
    query: String,
    /// Lowercased query, untrimmed. `None` while the query is blank.
    needle: Option<String>,
    cache: Option<(u64, Vec<Post>)>,
}

impl SearchFilter {
    pub fn new(query: impl Into<String>) -> Self {
        let mut filter = Self::default();
        filter.set_query(query);
        filter
    }

    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        let query = query.into();
        if query == self.query {
            return;
        }

        self.needle = (!query.trim().is_empty()).then(|| query.to_lowercase());
        self.query = query;
        self.cache = None;
    }

    /// Whether the filter hides anything at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.needle.is_some()
    }

    #[must_use]
    pub fn matches(&self, post: &Post) -> bool {
        self.needle
            .as_deref()
            .is_none_or(|needle| post.content.to_lowercase().contains(needle))
    }

    /// The matching posts, in feed order.
    #[must_use]
    pub fn apply<'a>(&self, posts: &'a [Post]) -> Vec<&'a Post> {
        posts.iter().filter(|post| self.matches(post)).collect()
    }

    /// The matching posts of the store. Recomputed only when the query or
    /// the posts changed since the last call.
    pub fn view<D: DataService>(&mut self, store: &FeedStore<D>) -> &[Post] {
        let fresh = matches!(&self.cache, Some((revision, _)) if *revision == store.revision());
        if !fresh {
            let filtered = store.with_posts(|posts, revision| {
                let matching = posts
                    .iter()
                    .filter(|post| self.matches(post))
                    .cloned()
                    .collect();
                (revision, matching)
            });
            self.cache = Some(filtered);
        }

        match &self.cache {
            Some((_, posts)) => posts,
            None => &[],
        }
    }
}
