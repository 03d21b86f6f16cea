//! Remembers what this client already liked, across sessions.
//!
//! Likes are one-way: there is deliberately no way to remove an entry.

use chorus_common::model::{Id, comment::CommentMarker, post::PostMarker};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::Display,
    io,
    path::{Path, PathBuf},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Interaction {
    Post(Id<PostMarker>),
    Comment(Id<CommentMarker>),
}

impl Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interaction::Post(id) => write!(f, "post {id}"),
            Interaction::Comment(id) => write!(f, "comment {id}"),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub liked_posts: BTreeSet<Id<PostMarker>>,
    #[serde(default)]
    pub liked_comments: BTreeSet<Id<CommentMarker>>,
}

impl LedgerSnapshot {
    #[must_use]
    pub fn contains(&self, interaction: Interaction) -> bool {
        match interaction {
            Interaction::Post(id) => self.liked_posts.contains(&id),
            Interaction::Comment(id) => self.liked_comments.contains(&id),
        }
    }

    /// Returns whether the entry was new.
    pub fn insert(&mut self, interaction: Interaction) -> bool {
        match interaction {
            Interaction::Post(id) => self.liked_posts.insert(id),
            Interaction::Comment(id) => self.liked_comments.insert(id),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.liked_posts.len() + self.liked_comments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Could not access ledger file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Ledger file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Ledger could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Ledger storage is unavailable")]
    Unavailable,
}

/// Device-local storage for the ledger. Writes must be durable when they
/// return.
pub trait LedgerPersistence: Send + Sync {
    fn read_ledger(&self) -> impl Future<Output = Result<LedgerSnapshot, LedgerError>> + Send;

    fn write_ledger(
        &self,
        ledger: &LedgerSnapshot,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

/// Stores the ledger as a JSON document.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct JsonFileLedger {
    path: PathBuf,
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerPersistence for JsonFileLedger {
    async fn read_ledger(&self) -> Result<LedgerSnapshot, LedgerError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No ledger file yet");
                return Ok(LedgerSnapshot::default());
            }
            Err(err) => return Err(self.io_error(err)),
        };

        serde_json::from_slice(&bytes).map_err(|source| LedgerError::Malformed {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_ledger(&self, ledger: &LedgerSnapshot) -> Result<(), LedgerError> {
        let encoded = serde_json::to_vec_pretty(ledger).map_err(LedgerError::Encode)?;

        // Written beside the target and renamed over it, so a reader only
        // ever sees the old or the new ledger.
        let mut temp_path = self.path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|err| self.io_error(err))?;
        file.write_all(&encoded)
            .await
            .map_err(|err| self.io_error(err))?;
        file.sync_all().await.map_err(|err| self.io_error(err))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|err| self.io_error(err))
    }
}

/// Keeps the ledger in memory only. Writes can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    stored: Mutex<LedgerSnapshot>,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            stored: Mutex::new(snapshot),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stored(&self) -> LedgerSnapshot {
        lock(&self.stored).clone()
    }
}

impl LedgerPersistence for MemoryLedger {
    async fn read_ledger(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.stored())
    }

    async fn write_ledger(&self, ledger: &LedgerSnapshot) -> Result<(), LedgerError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(LedgerError::Unavailable);
        }

        ledger.clone_into(&mut lock(&self.stored));
        Ok(())
    }
}

/// The in-memory guard plus its persisted copy. One instance is shared by
/// everything that likes on behalf of this client.
#[derive(Debug)]
pub struct InteractionLedger<P> {
    persistence: P,
    liked: Mutex<LedgerSnapshot>,
    /// Held for the whole write, so snapshots reach storage in order.
    writing: tokio::sync::Mutex<()>,
}

impl<P: LedgerPersistence> InteractionLedger<P> {
    /// Starts empty if the persisted ledger cannot be read.
    pub async fn load(persistence: P) -> Self {
        let liked = persistence.read_ledger().await.unwrap_or_else(|error| {
            warn!(%error, "Could not read interaction ledger, starting empty");
            LedgerSnapshot::default()
        });
        debug!(entries = liked.len(), "Interaction ledger loaded");

        Self {
            persistence,
            liked: Mutex::new(liked),
            writing: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn has_liked(&self, interaction: Interaction) -> bool {
        lock(&self.liked).contains(interaction)
    }

    /// Adds the entry and persists the whole ledger before returning. The
    /// in-memory entry stays even if persisting fails.
    pub async fn record_like(&self, interaction: Interaction) -> Result<(), LedgerError> {
        let _writing = self.writing.lock().await;
        let snapshot = {
            let mut liked = lock(&self.liked);
            if !liked.insert(interaction) {
                return Ok(());
            }
            liked.clone()
        };

        self.persistence
            .write_ledger(&snapshot)
            .await
            .inspect_err(|error| {
                warn!(%interaction, %error, "Like recorded for this session only");
            })
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        lock(&self.liked).clone()
    }

    #[must_use]
    pub fn persistence(&self) -> &P {
        &self.persistence
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
