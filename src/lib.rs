//! gator: a feed aggregator that polls registered RSS feeds on a fixed
//! interval and stores their entries in SQLite.
//!
//! The polling core lives in [`scheduler`] and [`feed`]; [`storage`] holds
//! users, feeds, follows and posts; [`commands`] is the CLI on top.

pub mod commands;
pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
