use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::schema::Database;
use super::types::{
    to_millis, Feed, FeedDbRow, FeedListing, FeedTarget, FetchOutcome, FetchState, StoreError,
};

const FEED_COLUMNS: &str = "id, name, url, user_id, created_at, updated_at, last_fetched_at, \
     last_success_at, last_error, consecutive_failures, fetch_state";

impl Database {
    // ========================================================================
    // Feed Registration
    // ========================================================================

    /// Register a feed owned by `user_id`. URLs are unique across all users.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Feed, StoreError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            r#"
            INSERT INTO feeds (id, name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {FEED_COLUMNS}
        "#
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::on_unique(e, format!("feed '{}'", url)))?;

        Ok(row.into_feed())
    }

    pub async fn get_feed(&self, feed_id: Uuid) -> Result<Option<Feed>, StoreError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, StoreError> {
        let row = sqlx::query_as::<_, FeedDbRow>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedDbRow::into_feed))
    }

    /// All feeds with the name of the user who added them
    pub async fn list_feeds(&self) -> Result<Vec<FeedListing>, StoreError> {
        let rows = sqlx::query_as::<_, FeedListing>(
            r#"
            SELECT f.name, f.url, u.name AS user_name, f.consecutive_failures, f.last_error
            FROM feeds f
            INNER JOIN users u ON f.user_id = u.id
            ORDER BY f.created_at, f.name
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ========================================================================
    // Polling Operations
    // ========================================================================

    /// Pick the most overdue feed.
    ///
    /// Never-fetched feeds (`last_fetched_at IS NULL`) come first, then the
    /// oldest attempt. Ties fall back to registration order so the rotation is
    /// deterministic.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` when no feed is registered.
    pub async fn select_next_feed(&self) -> Result<FeedTarget, StoreError> {
        sqlx::query_as::<_, FeedTarget>(
            r#"
            SELECT id, url
            FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, created_at ASC, id ASC
            LIMIT 1
        "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("feed"))
    }

    /// Record a fetch attempt. Called before the network request so that a
    /// feed whose fetch fails or hangs still moves to the back of the rotation.
    pub async fn mark_fetched(&self, feed_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE feeds SET last_fetched_at = ?, updated_at = ?, fetch_state = ? WHERE id = ?",
        )
        .bind(to_millis(at))
        .bind(to_millis(at))
        .bind(FetchState::Fetching.as_str())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("feed"));
        }
        Ok(())
    }

    /// Store how the attempt started by [`Database::mark_fetched`] ended.
    ///
    /// Success clears the error and resets the failure streak; failure keeps
    /// the message and extends it. Returns the feed's failure streak.
    pub async fn record_fetch_outcome(
        &self,
        feed_id: Uuid,
        at: DateTime<Utc>,
        outcome: &FetchOutcome,
    ) -> Result<i64, StoreError> {
        let streak: Option<(i64,)> = match outcome {
            FetchOutcome::Success => {
                sqlx::query_as(
                    r#"
                    UPDATE feeds
                    SET fetch_state = ?, last_success_at = ?, last_error = NULL,
                        consecutive_failures = 0
                    WHERE id = ?
                    RETURNING consecutive_failures
                "#,
                )
                .bind(FetchState::Fetched.as_str())
                .bind(to_millis(at))
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?
            }
            FetchOutcome::Failure(message) => {
                sqlx::query_as(
                    r#"
                    UPDATE feeds
                    SET fetch_state = ?, last_error = ?,
                        consecutive_failures = consecutive_failures + 1
                    WHERE id = ?
                    RETURNING consecutive_failures
                "#,
                )
                .bind(FetchState::Failed.as_str())
                .bind(message)
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        streak
            .map(|(count,)| count)
            .ok_or(StoreError::NotFound("feed"))
    }
}
