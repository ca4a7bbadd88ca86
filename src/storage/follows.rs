use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::schema::Database;
use super::types::{to_millis, FollowedFeed, StoreError};

impl Database {
    // ========================================================================
    // Follow Operations
    // ========================================================================

    /// Make `user_id` follow `feed_id`, returning the joined follow record.
    pub async fn follow_feed(
        &self,
        user_id: Uuid,
        feed_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FollowedFeed, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO feed_follows (id, user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
        "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(feed_id)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::on_unique(e, "follow"))?;

        let follow = sqlx::query_as::<_, FollowedFeed>(
            r#"
            SELECT f.id AS feed_id, f.name AS feed_name, f.url AS feed_url, u.name AS user_name
            FROM feeds f, users u
            WHERE f.id = ? AND u.id = ?
        "#,
        )
        .bind(feed_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("feed"))?;

        tx.commit().await?;
        Ok(follow)
    }

    /// Feeds followed by a user, in the order they were followed
    pub async fn feeds_followed_by(&self, user_id: Uuid) -> Result<Vec<FollowedFeed>, StoreError> {
        let rows = sqlx::query_as::<_, FollowedFeed>(
            r#"
            SELECT f.id AS feed_id, f.name AS feed_name, f.url AS feed_url, u.name AS user_name
            FROM feed_follows ff
            INNER JOIN feeds f ON ff.feed_id = f.id
            INNER JOIN users u ON ff.user_id = u.id
            WHERE ff.user_id = ?
            ORDER BY ff.created_at, f.name
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Remove a follow, returning whether one existed
    pub async fn unfollow_feed(&self, user_id: Uuid, feed_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
