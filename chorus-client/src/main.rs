use chorus_common::{model::Id, snowflake::NodeId};
use chorus_db::{client::DbClient, media::PgMediaStore};
use chorus_feed::{
    config::FeedConfig,
    coordinator::{MutationCoordinator, MutationError, Notice},
    ledger::{InteractionLedger, JsonFileLedger},
    scroll::{ScrollOutcome, ScrollScheduler},
    search::SearchFilter,
    service::DataService,
    store::{CommentView, FeedError, FeedStore},
    thread::walk,
};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error connecting to the database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Error loading the feed: {0}")]
    Feed(#[from] FeedError),
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    database_url: String,
    #[serde(default = "default_ledger_path")]
    ledger_path: PathBuf,
    /// Defaults to the feed's public url.
    media_base_url: Option<String>,
    #[serde(default)]
    node_id: NodeId,
    /// Only show posts containing this.
    search: Option<String>,
    /// Like this post once the feed is loaded.
    like_post: Option<u64>,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("chorus-ledger.json")
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chorus_client=debug,chorus_feed=debug,chorus_db=debug,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

fn report(error: &MutationError) {
    match error.notice() {
        Notice::Info => info!(%error, "Nothing to do"),
        Notice::Warning => warn!(%error, "Mutation rejected"),
        Notice::Error => error!(%error, retryable = error.is_retryable(), "Mutation failed"),
    }
}

/// Scrolls to the end of the feed.
async fn load_feed<D: DataService>(
    store: &FeedStore<D>,
    scheduler: &ScrollScheduler<D>,
) -> Result<(), FeedError> {
    store.load_first_page().await?;

    loop {
        match scheduler.on_sentinel_visible().await? {
            ScrollOutcome::Exhausted => break,
            ScrollOutcome::Fetched(outcome) => debug!(?outcome, "Page settled"),
            ScrollOutcome::Dropped | ScrollOutcome::Hidden => {}
        }
    }

    info!(posts = store.len(), pages = store.cursor(), "Feed loaded");
    Ok(())
}

async fn show_feed<D: DataService>(
    store: &FeedStore<D>,
    filter: &mut SearchFilter,
) -> Result<(), FeedError> {
    let posts = filter.view(store).to_vec();
    info!(shown = posts.len(), query = filter.query(), "Showing feed");

    for post in posts {
        if let CommentView::Loading = store.comments(post.id).await? {
            continue;
        }
        info!(
            id = %post.id,
            likes = post.likes,
            comments = store.comment_count(post.id).unwrap_or(0),
            media = post.media.as_ref().map(|media| media.url.as_str()),
            link = %store.permalink(post.id),
            "{}",
            post.content
        );

        let threads = store.comment_threads(post.id).unwrap_or_default();
        for (depth, comment) in walk(&threads) {
            info!(
                depth,
                id = %comment.id,
                likes = comment.likes,
                "{:indent$}{}",
                "",
                comment.content,
                indent = depth * 2
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;
    let feed_config = FeedConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&env.database_url)
        .await?;
    chorus_db::ensure_schema(&pool).await?;

    let data = Arc::new(DbClient::new(pool.clone(), env.node_id));
    let media_base_url = env
        .media_base_url
        .unwrap_or_else(|| feed_config.public_url.clone());
    let media = Arc::new(PgMediaStore::new(pool, media_base_url));
    let ledger = Arc::new(InteractionLedger::load(JsonFileLedger::new(env.ledger_path)).await);

    let store = Arc::new(FeedStore::new(Arc::clone(&data), &feed_config));
    let scheduler = ScrollScheduler::new(Arc::clone(&store));
    let coordinator = MutationCoordinator::new(
        data,
        media,
        Arc::clone(&store),
        ledger,
        feed_config.media_limits(),
    );

    load_feed(&store, &scheduler).await?;

    if let Some(id) = env.like_post {
        match coordinator.like_post(Id::from(id)).await {
            Ok(receipt) => {
                info!(liked = %receipt.target, likes = receipt.likes, "Liked");
                if let Some(error) = receipt.ledger_warning {
                    warn!(%error, "Like will be forgotten after this session");
                }
            }
            Err(error) => report(&error),
        }
    }

    let mut filter = SearchFilter::new(env.search.unwrap_or_default());
    show_feed(&store, &mut filter).await?;

    Ok(())
}
