use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::feed::parser::{Document, Item};
use crate::storage::{FeedStore, InsertOutcome, NewPost, UNKNOWN_PUBLISHED};

/// `pubDate` layout after the weekday, e.g. `02 Jan 2006 15:04:05 -0700`
const PUB_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

/// Byte shape of the text after the weekday: `0` digit, `A` letter, `+` sign
const PUB_DATE_SHAPE: &[u8] = b"00 AAA 0000 00:00:00 +0000";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Per-entry tally of one ingestion pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub inserted: usize,
    pub duplicates: usize,
    /// Entries the store rejected; each was logged
    pub failed: usize,
    /// Entries stored with [`UNKNOWN_PUBLISHED`]
    pub unparsed_dates: usize,
}

impl IngestReport {
    pub fn attempted(&self) -> usize {
        self.inserted + self.duplicates + self.failed
    }
}

/// Parse a `pubDate` in the fixed layout `Mon, 02 Jan 2006 15:04:05 -0700`.
///
/// The weekday must be a valid abbreviation but is not checked against the
/// date; plenty of feeds get it wrong.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let (weekday, rest) = raw.trim().split_once(", ")?;
    if !WEEKDAYS.contains(&weekday) || !has_pub_date_shape(rest) {
        return None;
    }
    DateTime::parse_from_str(rest, PUB_DATE_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// chrono alone also takes one-digit days and `-07:00` zones
fn has_pub_date_shape(text: &str) -> bool {
    text.len() == PUB_DATE_SHAPE.len()
        && text.bytes().zip(PUB_DATE_SHAPE).all(|(c, &shape)| match shape {
            b'0' => c.is_ascii_digit(),
            b'A' => c.is_ascii_alphabetic(),
            b'+' => c == b'+' || c == b'-',
            _ => c == shape,
        })
}

fn new_post(feed_id: Uuid, item: &Item, published_at: DateTime<Utc>, now: DateTime<Utc>) -> NewPost {
    NewPost {
        id: Uuid::new_v4(),
        title: item.title.clone(),
        url: item.link.clone(),
        description: item.description.clone(),
        published_at,
        feed_id,
        created_at: now,
        updated_at: now,
    }
}

/// Store every entry of `document` as a post of `feed_id`.
///
/// Entries are attempted in document order. A bad date or a rejected insert
/// affects only that entry; this function never fails.
pub async fn ingest<S>(store: &S, feed_id: Uuid, document: &Document, now: DateTime<Utc>) -> IngestReport
where
    S: FeedStore + ?Sized,
{
    let mut report = IngestReport::default();

    for item in &document.channel.items {
        let published_at = match parse_pub_date(&item.pub_date) {
            Some(at) => at,
            None => {
                tracing::debug!(
                    feed_id = %feed_id,
                    url = %item.link,
                    pub_date = %item.pub_date,
                    "Unparseable pubDate, storing sentinel"
                );
                report.unparsed_dates += 1;
                UNKNOWN_PUBLISHED
            }
        };

        let post = new_post(feed_id, item, published_at, now);
        match store.insert_post(&post).await {
            Ok(InsertOutcome::Inserted) => report.inserted += 1,
            Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
            Err(e) => {
                tracing::warn!(
                    feed_id = %feed_id,
                    url = %item.link,
                    error = %e,
                    "Failed to store post"
                );
                report.failed += 1;
            }
        }
    }

    report
}
