//! Feed retrieval pipeline: fetch a document over HTTP, decode it, and store
//! its entries as posts.
//!
//! - [`fetcher`] - HTTP GET with a timeout and body size limit
//! - [`parser`] - RSS-style XML decoding into a [`Document`]
//! - [`ingest`] - per-entry normalization and persistence via a
//!   [`FeedStore`](crate::storage::FeedStore)

mod fetcher;
mod ingest;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, MAX_FEED_SIZE};
pub use ingest::{ingest, parse_pub_date, IngestReport};
pub use parser::{parse_document, Channel, Document, Item, ParseError};
