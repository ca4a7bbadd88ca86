//! Periodic feed collection.
//!
//! Each tick runs one cycle: pick the stalest feed, record the attempt,
//! fetch and decode it, then store its entries. A failing cycle is logged and
//! the loop carries on; only the shutdown future ends it.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::feed::{ingest, FeedFetcher, FetchError, IngestReport};
use crate::storage::{FeedStore, FeedTarget, FetchOutcome, StoreError};

#[derive(Debug, Error)]
pub enum CycleError {
    /// Nothing to poll yet
    #[error("no feeds registered")]
    NoFeeds,

    #[error("selecting next feed: {0}")]
    Select(#[source] StoreError),

    /// The attempt could not be recorded, so the feed was not fetched
    #[error("marking feed from {url} as fetched: {source}")]
    MarkFetched {
        url: String,
        #[source]
        source: StoreError,
    },

    #[error("fetching feed from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// Shutdown arrived while the feed was being fetched
    #[error("fetch of {url} interrupted by shutdown")]
    Interrupted { url: String },
}

/// What one successful cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub feed_id: Uuid,
    pub url: String,
    pub title: String,
    pub ingest: IngestReport,
}

pub struct Scheduler<S> {
    store: S,
    fetcher: FeedFetcher,
}

impl<S: FeedStore> Scheduler<S> {
    pub fn new(store: S, fetcher: FeedFetcher) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Poll one feed every `interval` until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. Ticks missed while a slow cycle was
    /// running are not made up; the next cycle starts a full interval later.
    /// `shutdown` is also raced against the network fetch, so a hung server
    /// can't delay exit.
    pub async fn run<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?interval, "Collecting feeds");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping feed collection");
                    break;
                }

                _ = ticker.tick() => {}
            }

            match self.cycle(Utc::now(), &mut shutdown).await {
                Ok(report) => {
                    tracing::info!(
                        feed = %report.url,
                        title = %report.title,
                        inserted = report.ingest.inserted,
                        duplicates = report.ingest.duplicates,
                        failed = report.ingest.failed,
                        "Collected feed"
                    );
                }
                Err(CycleError::Interrupted { url }) => {
                    tracing::info!(feed = %url, "Shutdown requested during fetch, stopping feed collection");
                    break;
                }
                Err(CycleError::NoFeeds) => {
                    tracing::warn!("No feeds registered; add one with `gator addfeed`");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Feed cycle failed");
                }
            }
        }
    }

    /// Run a single select → mark → fetch → ingest cycle at time `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, CycleError> {
        self.cycle(now, std::future::pending::<()>()).await
    }

    async fn cycle<I>(&self, now: DateTime<Utc>, interrupt: I) -> Result<CycleReport, CycleError>
    where
        I: Future<Output = ()>,
    {
        let feed = match self.store.select_next_feed().await {
            Ok(feed) => feed,
            Err(StoreError::NotFound(_)) => return Err(CycleError::NoFeeds),
            Err(e) => return Err(CycleError::Select(e)),
        };

        // Recorded before the request: a feed whose fetch fails or hangs
        // still goes to the back of the rotation.
        self.store
            .mark_fetched(feed.id, now)
            .await
            .map_err(|source| CycleError::MarkFetched {
                url: feed.url.clone(),
                source,
            })?;

        let fetched = tokio::select! {
            biased;

            _ = interrupt => return Err(CycleError::Interrupted { url: feed.url.clone() }),

            result = self.fetcher.fetch(&feed.url) => result,
        };

        let document = match fetched {
            Ok(document) => document,
            Err(source) => {
                self.record_outcome(&feed, FetchOutcome::Failure(source.to_string()))
                    .await;
                return Err(CycleError::Fetch {
                    url: feed.url,
                    source,
                });
            }
        };
        self.record_outcome(&feed, FetchOutcome::Success).await;

        let ingest = ingest(&self.store, feed.id, &document, now).await;

        Ok(CycleReport {
            feed_id: feed.id,
            url: feed.url,
            title: document.channel.title,
            ingest,
        })
    }

    /// Health bookkeeping only; a failure here never fails the cycle.
    async fn record_outcome(&self, feed: &FeedTarget, outcome: FetchOutcome) {
        match self
            .store
            .record_fetch_outcome(feed.id, Utc::now(), &outcome)
            .await
        {
            Ok(streak) if streak > 1 => {
                tracing::warn!(feed = %feed.url, failures = streak, "Feed keeps failing");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(feed = %feed.url, error = %e, "Failed to record fetch outcome");
            }
        }
    }
}
