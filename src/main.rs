use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gator::commands::{execute, shutdown_signal, Args, State};
use gator::config::Config;
use gator::storage::{Database, StoreError};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides; default shows the collector's per-cycle lines
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = Config::default_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.resolve_db_path(&config_dir);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }
    }

    // SEC-007: Restrict the default config directory to the current user
    #[cfg(unix)]
    if config_dir.exists() {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: {}", StoreError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    let mut state = State {
        db,
        config,
        config_path,
    };

    let mut stdout = std::io::stdout().lock();
    execute(&mut state, args.command, &mut stdout, shutdown_signal()).await
}
