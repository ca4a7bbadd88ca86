use uuid::Uuid;

use super::schema::Database;
use super::types::{to_millis, InsertOutcome, NewPost, Post, PostDbRow, StoreError};

/// Maximum number of posts returned by a single browse query
const MAX_POSTS: i64 = 500;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert one post.
    ///
    /// A post whose `(feed_id, url)` already exists is skipped and reported
    /// as [`InsertOutcome::Duplicate`]. Other failures (e.g. the feed was
    /// deleted mid-cycle) are returned as errors.
    pub async fn insert_post(&self, post: &NewPost) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (id, title, url, description, published_at, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
        "#,
        )
        .bind(post.id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(to_millis(post.published_at))
        .bind(post.feed_id)
        .bind(to_millis(post.created_at))
        .bind(to_millis(post.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }

    /// Posts of one feed, newest publication first
    pub async fn posts_for_feed(&self, feed_id: Uuid) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query_as::<_, PostDbRow>(
            r#"
            SELECT id, title, url, description, published_at, feed_id, created_at, updated_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY published_at DESC, created_at DESC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(MAX_POSTS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostDbRow::into_post).collect())
    }

    /// Latest posts across every feed the user follows
    pub async fn posts_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Post>, StoreError> {
        let limit = limit.clamp(0, MAX_POSTS);
        let rows = sqlx::query_as::<_, PostDbRow>(
            r#"
            SELECT p.id, p.title, p.url, p.description, p.published_at, p.feed_id,
                   p.created_at, p.updated_at
            FROM posts p
            INNER JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC, p.created_at DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostDbRow::into_post).collect())
    }
}
