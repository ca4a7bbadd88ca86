//! Command-line surface: argument definitions and one handler per command.
//!
//! Handlers write their output to the supplied writer so they can be
//! exercised against a buffer.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use crate::config::{parse_interval, Config};
use crate::feed::FeedFetcher;
use crate::scheduler::Scheduler;
use crate::storage::{Database, Post, User};
use crate::util::validate_feed_url;

#[derive(Parser, Debug)]
#[command(name = "gator", version, about = "Feed aggregator: poll RSS feeds and browse their posts")]
pub struct Args {
    /// Config file (default: ~/.config/gator/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch the current user
    Login { name: String },
    /// List users, marking the current one
    Users,
    /// Delete every user along with their feeds, follows and posts
    Reset,
    /// Register a feed and follow it
    Addfeed { name: String, url: String },
    /// List every registered feed
    Feeds,
    /// Follow an already registered feed
    Follow { url: String },
    /// List feeds the current user follows
    Following,
    /// Stop following a feed
    Unfollow { url: String },
    /// Show the latest posts from followed feeds
    Browse {
        #[arg(default_value_t = 2)]
        limit: i64,
    },
    /// Poll feeds forever, one per interval (e.g. 30s, 1m, 1h30m)
    Agg { interval: String },
}

/// Everything a handler needs, passed explicitly.
pub struct State {
    pub db: Database,
    pub config: Config,
    pub config_path: PathBuf,
}

impl State {
    /// The logged-in user, which must exist in the database.
    async fn current_user(&self) -> Result<User> {
        let Some(name) = self.config.current_user_name.as_deref() else {
            bail!("no user logged in; run `gator register <name>` or `gator login <name>`");
        };
        self.db
            .get_user_by_name(name)
            .await?
            .with_context(|| format!("current user '{}' is not registered", name))
    }
}

/// Dispatch a command. `shutdown` is only awaited by `agg`.
pub async fn execute<W, F>(state: &mut State, command: Command, out: &mut W, shutdown: F) -> Result<()>
where
    W: Write,
    F: Future<Output = ()>,
{
    match command {
        Command::Register { name } => register(state, &name, out).await,
        Command::Login { name } => login(state, &name, out).await,
        Command::Users => users(state, out).await,
        Command::Reset => reset(state, out).await,
        Command::Addfeed { name, url } => add_feed(state, &name, &url, out).await,
        Command::Feeds => feeds(state, out).await,
        Command::Follow { url } => follow(state, &url, out).await,
        Command::Following => following(state, out).await,
        Command::Unfollow { url } => unfollow(state, &url, out).await,
        Command::Browse { limit } => browse(state, limit, out).await,
        Command::Agg { interval } => agg(state, &interval, out, shutdown).await,
    }
}

// ============================================================================
// Users
// ============================================================================

async fn register<W: Write>(state: &mut State, name: &str, out: &mut W) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("user name must not be empty");
    }
    let user = state
        .db
        .create_user(name, Utc::now())
        .await
        .context("couldn't create user")?;
    state
        .config
        .set_user(&user.name, &state.config_path)
        .context("couldn't save the configuration")?;

    tracing::info!(user = %user.name, id = %user.id, "Registered user");
    writeln!(out, "User {} created and logged in", user.name)?;
    Ok(())
}

async fn login<W: Write>(state: &mut State, name: &str, out: &mut W) -> Result<()> {
    if state.db.get_user_by_name(name).await?.is_none() {
        bail!("user '{}' is not registered", name);
    }
    state
        .config
        .set_user(name, &state.config_path)
        .context("couldn't save the configuration")?;

    writeln!(out, "Logged in as {}", name)?;
    Ok(())
}

async fn users<W: Write>(state: &State, out: &mut W) -> Result<()> {
    let current = state.config.current_user_name.as_deref();
    for user in state.db.list_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

async fn reset<W: Write>(state: &State, out: &mut W) -> Result<()> {
    let deleted = state
        .db
        .delete_all_users()
        .await
        .context("couldn't reset the database")?;
    tracing::info!(users = deleted, "Database reset");
    writeln!(out, "Database reset ({} users removed)", deleted)?;
    Ok(())
}

// ============================================================================
// Feeds and follows
// ============================================================================

async fn add_feed<W: Write>(state: &State, name: &str, url: &str, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let url = validate_feed_url(url).with_context(|| format!("'{}' is not a usable feed URL", url))?;

    let now = Utc::now();
    let feed = state
        .db
        .create_feed(name, url.as_str(), user.id, now)
        .await
        .context("storing feed")?;
    let follow = state
        .db
        .follow_feed(user.id, feed.id, now)
        .await
        .context("following feed after adding it")?;

    tracing::info!(feed = %feed.url, user = %user.name, "Added feed");
    writeln!(out, "Added feed {} ({})", feed.name, feed.url)?;
    writeln!(out, "{} now follows {}", follow.user_name, follow.feed_name)?;
    Ok(())
}

async fn feeds<W: Write>(state: &State, out: &mut W) -> Result<()> {
    for feed in state.db.list_feeds().await? {
        write!(out, "* {} ({}) added by {}", feed.name, feed.url, feed.user_name)?;
        if feed.consecutive_failures > 0 {
            write!(
                out,
                " [failing x{}: {}]",
                feed.consecutive_failures,
                feed.last_error.as_deref().unwrap_or("unknown error")
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

async fn follow<W: Write>(state: &State, url: &str, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .with_context(|| format!("no feed registered with URL {}", url))?;
    let follow = state
        .db
        .follow_feed(user.id, feed.id, Utc::now())
        .await
        .context("storing feed follow")?;

    writeln!(out, "{} now follows {}", follow.user_name, follow.feed_name)?;
    Ok(())
}

async fn following<W: Write>(state: &State, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    for follow in state.db.feeds_followed_by(user.id).await? {
        writeln!(out, "* {} ({})", follow.feed_name, follow.feed_url)?;
    }
    Ok(())
}

async fn unfollow<W: Write>(state: &State, url: &str, out: &mut W) -> Result<()> {
    let user = state.current_user().await?;
    let feed = state
        .db
        .get_feed_by_url(url)
        .await?
        .with_context(|| format!("no feed registered with URL {}", url))?;

    if !state.db.unfollow_feed(user.id, feed.id).await? {
        bail!("{} does not follow {}", user.name, feed.name);
    }
    writeln!(out, "{} unfollowed {}", user.name, feed.name)?;
    Ok(())
}

// ============================================================================
// Posts
// ============================================================================

async fn browse<W: Write>(state: &State, limit: i64, out: &mut W) -> Result<()> {
    if limit <= 0 {
        bail!("limit must be a positive number");
    }
    let user = state.current_user().await?;
    let posts = state.db.posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(out, "No posts yet. Follow a feed and run `gator agg`.")?;
        return Ok(());
    }
    for post in &posts {
        write_post(out, post)?;
    }
    Ok(())
}

fn write_post<W: Write>(out: &mut W, post: &Post) -> std::io::Result<()> {
    let published = if post.has_known_publish_date() {
        post.published_at.format("%Y-%m-%d %H:%M UTC").to_string()
    } else {
        "unknown date".to_string()
    };
    writeln!(out, "--- {} ---", post.title)?;
    writeln!(out, "{}", published)?;
    if !post.url.is_empty() {
        writeln!(out, "{}", post.url)?;
    }
    if !post.description.is_empty() {
        writeln!(out, "{}", post.description)?;
    }
    writeln!(out)
}

// ============================================================================
// Aggregation
// ============================================================================

async fn agg<W, F>(state: &State, interval: &str, out: &mut W, shutdown: F) -> Result<()>
where
    W: Write,
    F: Future<Output = ()>,
{
    let interval = parse_interval(interval).context("invalid interval")?;
    let fetcher = FeedFetcher::from_config(&state.config).context("building HTTP client")?;
    let scheduler = Scheduler::new(state.db.clone(), fetcher);

    writeln!(out, "Collecting feeds every {:?}", interval)?;
    out.flush()?;
    scheduler.run(interval, shutdown).await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-Unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl-C, shutting down gracefully");
    }
}
