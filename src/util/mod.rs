//! Small helpers shared by the CLI and the scheduler.
//!
//! - **Feed URL validation**: reject URLs the fetcher can't GET
//! - **Durations**: parse interval text such as `"1h30m"`

mod duration;
mod feed_url;

pub use duration::{parse_duration, DurationError};
pub use feed_url::{validate_feed_url, FeedUrlError};
