use crate::{
    service::DataService,
    store::{FeedStore, PageOutcome, Result},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, trace};

/// Share of the sentinel that has to be visible before it counts as reached.
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.1;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ScrollOutcome {
    Fetched(PageOutcome),
    /// A fetch was already running. Nothing is queued.
    Dropped,
    /// The feed has no more pages.
    Exhausted,
    /// Less of the sentinel than the threshold was visible.
    Hidden,
}

/// Loads the next page when the end of the feed comes into view, one page
/// at a time.
pub struct ScrollScheduler<D> {
    store: Arc<FeedStore<D>>,
    in_flight: AtomicBool,
    threshold: f64,
}

struct ClearOnDrop<'a>(&'a AtomicBool);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<D: DataService> ScrollScheduler<D> {
    pub fn new(store: Arc<FeedStore<D>>) -> Self {
        Self::with_threshold(store, DEFAULT_VISIBILITY_THRESHOLD)
    }

    pub fn with_threshold(store: Arc<FeedStore<D>>, threshold: f64) -> Self {
        Self {
            store,
            in_flight: AtomicBool::new(false),
            threshold,
        }
    }

    /// Reports how much of the sentinel is visible, from 0 to 1.
    pub async fn on_visibility(&self, ratio: f64) -> Result<ScrollOutcome> {
        if ratio < self.threshold {
            return Ok(ScrollOutcome::Hidden);
        }

        self.on_sentinel_visible().await
    }

    pub async fn on_sentinel_visible(&self) -> Result<ScrollOutcome> {
        if !self.store.has_more() {
            trace!("Sentinel visible, feed exhausted");
            return Ok(ScrollOutcome::Exhausted);
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            trace!("Sentinel visible, page already loading");
            return Ok(ScrollOutcome::Dropped);
        }
        let _clear = ClearOnDrop(&self.in_flight);

        debug!(cursor = self.store.cursor(), "Sentinel reached");
        let outcome = self.store.load_next_page().await?;

        Ok(ScrollOutcome::Fetched(outcome))
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<FeedStore<D>> {
        &self.store
    }
}
