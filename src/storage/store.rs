use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::schema::Database;
use super::types::{FeedTarget, FetchOutcome, InsertOutcome, NewPost, StoreError};

/// The operations the polling loop needs from persistent storage.
///
/// [`Database`] is the production implementation; tests substitute doubles
/// that inject failures.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Least recently attempted feed, never-fetched feeds first
    async fn select_next_feed(&self) -> Result<FeedTarget, StoreError>;

    /// Record the start of a fetch attempt at `at`
    async fn mark_fetched(&self, feed_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, StoreError>;

    /// Store how the attempt ended; returns the failure streak
    async fn record_fetch_outcome(
        &self,
        feed_id: Uuid,
        at: DateTime<Utc>,
        outcome: &FetchOutcome,
    ) -> Result<i64, StoreError>;
}

#[async_trait]
impl FeedStore for Database {
    async fn select_next_feed(&self) -> Result<FeedTarget, StoreError> {
        Database::select_next_feed(self).await
    }

    async fn mark_fetched(&self, feed_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        Database::mark_fetched(self, feed_id, at).await
    }

    async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, StoreError> {
        Database::insert_post(self, post).await
    }

    async fn record_fetch_outcome(
        &self,
        feed_id: Uuid,
        at: DateTime<Utc>,
        outcome: &FetchOutcome,
    ) -> Result<i64, StoreError> {
        Database::record_fetch_outcome(self, feed_id, at, outcome).await
    }
}
