use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with operator-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another gator process holds a lock on the database file
    #[error("Another gator process appears to be using the database. Stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A lookup matched no row (e.g. no feeds registered yet)
    #[error("no {0} found")]
    NotFound(&'static str),

    /// A uniqueness constraint rejected the write
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, detecting lock contention on the database file
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::InstanceLocked;
        }

        StoreError::Other(err)
    }

    /// Map a unique-constraint violation to `AlreadyExists(what)`
    pub(crate) fn on_unique(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::AlreadyExists(what.into())
            }
            _ => StoreError::Other(err),
        }
    }
}

// ============================================================================
// Timestamps
// ============================================================================

/// Published timestamp stored when an entry's `pubDate` can't be parsed.
pub const UNKNOWN_PUBLISHED: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Timestamps are persisted as INTEGER Unix milliseconds so that
/// `ORDER BY` on them is numeric.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(UNKNOWN_PUBLISHED)
}

// ============================================================================
// Feed health
// ============================================================================

/// Where a feed is in its fetch lifecycle.
///
/// `Fetching` is written together with `last_fetched_at` before the network
/// call; a feed left in `Fetching` means the process stopped mid-cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    Fetched,
    Failed,
}

impl FetchState {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchState::Idle => "idle",
            FetchState::Fetching => "fetching",
            FetchState::Fetched => "fetched",
            FetchState::Failed => "failed",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        match value {
            "fetching" => FetchState::Fetching,
            "fetched" => FetchState::Fetched,
            "failed" => FetchState::Failed,
            _ => FetchState::Idle,
        }
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a fetch attempt, recorded after the cycle finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failure(String),
}

/// What happened to a single post insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A post with the same (feed, url) already exists; nothing was written
    Duplicate,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for feed queries (used by sqlx FromRow)
/// Converts to Feed via into_feed()
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
    pub last_success_at: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
    pub fetch_state: String,
}

impl FeedDbRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            name: self.name,
            url: self.url,
            user_id: self.user_id,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            last_fetched_at: self.last_fetched_at.map(from_millis),
            last_success_at: self.last_success_at.map(from_millis),
            last_error: self.last_error,
            consecutive_failures: self.consecutive_failures,
            fetch_state: FetchState::from_db(&self.fetch_state),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserDbRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserDbRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostDbRow {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: i64,
    pub feed_id: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PostDbRow {
    pub(crate) fn into_post(self) -> Post {
        Post {
            id: self.id,
            title: self.title,
            url: self.url,
            description: self.description,
            published_at: from_millis(self.published_at),
            feed_id: self.feed_id,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Feed record, including its fetch health.
#[derive(Debug, Clone)]
pub struct Feed {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// User who registered the feed
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent fetch attempt (not necessarily successful)
    pub last_fetched_at: Option<DateTime<Utc>>,
    /// Most recent fetch that decoded successfully
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
    pub fetch_state: FetchState,
}

/// The two columns the scheduler needs to poll a feed
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedTarget {
    pub id: Uuid,
    pub url: String,
}

/// Feed row joined with the name of the user who added it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedListing {
    pub name: String,
    pub url: String,
    pub user_name: String,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
}

/// A follow joined with the names on both sides
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FollowedFeed {
    pub feed_id: Uuid,
    pub feed_name: String,
    pub feed_url: String,
    pub user_name: String,
}

/// Post to be written by the ingestor
#[derive(Debug, Clone)]
pub struct NewPost {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub feed_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub feed_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// False when the feed's `pubDate` could not be parsed
    pub fn has_known_publish_date(&self) -> bool {
        self.published_at != UNKNOWN_PUBLISHED
    }
}
