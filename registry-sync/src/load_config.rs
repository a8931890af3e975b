/// `load_config` module: builds the runtime configuration from an optional YAML file plus environment overrides.
///
/// # Responsibilities
/// - Parse the optional YAML file into loosely-typed sections
/// - Apply environment variable overrides on top (same names the mirror has always used)
/// - Convert everything into the core's strongly-typed [`SyncConfig`]
///
/// # Precedence
/// defaults < YAML file < environment variables.
///
/// # Errors
/// Unreadable files, invalid YAML and unparsable environment values are all
/// reported as `anyhow::Error` with the offending source named.
use anyhow::{Context, Result};
use registry_sync_core::config::SyncConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_CACHE_DIR: &str = "./registry-cache";

#[derive(Debug)]
pub struct CliConfig {
    pub sync: SyncConfig,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    registry_url: Option<String>,
    changes_url: Option<String>,
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    sync: SyncSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncSection {
    concurrency: Option<usize>,
    catch_up_delay_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    stale_package_hours: Option<u64>,
    stale_retry_interval_minutes: Option<u64>,
    registry_timeout_minutes: Option<u64>,
    feed_batch_size: Option<usize>,
    feed_poll_timeout_ms: Option<u64>,
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 60 * 60)
}

/// Read `name` from the environment, parsing it when set.
fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => {
                info!(var = name, "Applying environment override");
                Ok(Some(value))
            }
            Err(e) => {
                error!(var = name, value = %raw, error = %e, "Invalid environment override");
                Err(anyhow::anyhow!("{name} has invalid value {raw:?}: {e}"))
            }
        },
        Err(_) => Ok(None),
    }
}

/// Load configuration. `path` is optional; without it only defaults and the
/// environment are used.
pub fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let file = match path {
        Some(path) => read_file(path)?,
        None => FileConfig::default(),
    };

    let mut sync = SyncConfig::default();
    if let Some(url) = file.registry_url {
        sync.registry_url = url;
    }
    if let Some(url) = file.changes_url {
        sync.changes_url = url;
    }
    let section = file.sync;
    if let Some(n) = section.concurrency {
        sync.concurrency = n;
    }
    if let Some(ms) = section.catch_up_delay_ms {
        sync.catch_up_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = section.retry_delay_ms {
        sync.retry_delay = Duration::from_millis(ms);
    }
    if let Some(h) = section.stale_package_hours {
        sync.stale_threshold = hours(h);
    }
    if let Some(m) = section.stale_retry_interval_minutes {
        sync.sweep_interval = minutes(m);
    }
    if let Some(m) = section.registry_timeout_minutes {
        sync.liveness_timeout = minutes(m);
    }
    if let Some(n) = section.feed_batch_size {
        sync.feed_batch_size = n;
    }
    if let Some(ms) = section.feed_poll_timeout_ms {
        sync.feed_poll_timeout = Duration::from_millis(ms);
    }

    if let Some(url) = env_var::<String>("REGISTRY_URL")? {
        sync.registry_url = url;
    }
    if let Some(url) = env_var::<String>("CHANGES_URL")? {
        sync.changes_url = url;
    }
    if let Some(n) = env_var::<usize>("SYNC_CONCURRENCY")? {
        sync.concurrency = n;
    }
    if let Some(ms) = env_var::<u64>("CAUGHT_UP_DELAY_MS")? {
        sync.catch_up_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = env_var::<u64>("REGISTRY_RETRY_DELAY")? {
        sync.retry_delay = Duration::from_millis(ms);
    }
    if let Some(h) = env_var::<u64>("STALE_PACKAGE_HOURS")? {
        sync.stale_threshold = hours(h);
    }
    if let Some(m) = env_var::<u64>("STALE_RETRY_INTERVAL_MINUTES")? {
        sync.sweep_interval = minutes(m);
    }
    if let Some(m) = env_var::<u64>("REGISTRY_TIMEOUT_MINUTES")? {
        sync.liveness_timeout = minutes(m);
    }

    let cache_dir = env_var::<PathBuf>("CACHE_DIR")?
        .or(file.cache_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

    sync.validate().context("configuration rejected")?;
    info!(cache_dir = %cache_dir.display(), "Config loaded and merged successfully");

    Ok(CliConfig { sync, cache_dir })
}

fn read_file(path: &Path) -> Result<FileConfig> {
    info!(config_path = ?path, "Loading configuration from file");

    let content = fs::read_to_string(path).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path, e)
    })?;

    // An empty file is a valid "all defaults" config.
    if content.trim().is_empty() {
        return Ok(FileConfig::default());
    }

    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })
}
