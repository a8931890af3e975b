//! CLI glue for registry-sync: argument parsing and wiring of the concrete
//! adapters into [`registry_sync_core::synchronise::synchronise`].
//!
//! All pipeline behaviour lives in `registry-sync-core`; this module only
//! builds the HTTP clients and cache backend and reports the result.
use crate::load_config::{load_config, CliConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use registry_sync_core::cache::FsCache;
use registry_sync_core::feed::CouchChangeFeed;
use registry_sync_core::origin::RegistryClient;
use registry_sync_core::store::PackageStore;
use registry_sync_core::synchronise::synchronise;
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for registry-sync: mirror a package registry into a slim local cache.
#[derive(Parser)]
#[clap(
    name = "registry-sync",
    version,
    about = "Mirror a package registry's change feed into a slim, resumable local cache"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Tail the change feed and keep the cache in sync. Runs until a fatal error.
    Run {
        /// Optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Cache directory (overrides config and CACHE_DIR)
        #[clap(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Print the persisted cursor and the packages waiting for a stale re-fetch.
    Status {
        #[clap(long)]
        config: Option<PathBuf>,
        #[clap(long)]
        cache_dir: Option<PathBuf>,
        /// Emit JSON instead of plain text
        #[clap(long)]
        json: bool,
    },
}

fn resolve(config: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Result<CliConfig> {
    let mut loaded = load_config(config.as_deref())?;
    if let Some(dir) = cache_dir {
        loaded.cache_dir = dir;
    }
    Ok(loaded)
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { config, cache_dir } => {
            let config = resolve(config, cache_dir)?;
            config.sync.trace_loaded();

            let cache = FsCache::open(&config.cache_dir)
                .await
                .with_context(|| format!("opening cache at {}", config.cache_dir.display()))?;
            let http = reqwest::Client::builder()
                .user_agent(concat!("registry-sync/", env!("CARGO_PKG_VERSION")))
                .build()
                .context("building HTTP client")?;
            let origin = RegistryClient::with_http_client(
                http.clone(),
                config.sync.registry_url.clone(),
                config.sync.retry_delay,
            );
            let feed = CouchChangeFeed::new(http, &config.sync);

            tracing::info!(command = "run", "Starting registry mirror");
            synchronise(
                &config.sync,
                Arc::new(origin),
                Arc::new(feed),
                Arc::new(cache),
            )
            .await?;
            Ok(())
        }
        Commands::Status {
            config,
            cache_dir,
            json,
        } => {
            let config = resolve(config, cache_dir)?;
            let cache = FsCache::open(&config.cache_dir)
                .await
                .with_context(|| format!("opening cache at {}", config.cache_dir.display()))?;
            let store = PackageStore::new(Arc::new(cache));
            let cursor = store.cursor().await?;
            let stale = store.stale_packages().await?;

            if json {
                let report = serde_json::json!({ "cursor": cursor, "stale": stale });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("cursor: {cursor}");
                println!("stale packages: {}", stale.len());
                for name in &stale {
                    println!("  {name}");
                }
            }
            Ok(())
        }
    }
}
