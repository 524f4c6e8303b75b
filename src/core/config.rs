//! # Configuration
//!
//! Environment-driven daemon configuration. `.env` files are loaded by the
//! binary before [`Config::from_env`] runs.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: Added reconcile interval and default channels
//! - 1.1.0: Added queue timeout and worker concurrency
//! - 1.0.0: Initial release

use crate::features::notifications::Channel;
use anyhow::{anyhow, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub log_level: String,
    /// Queue that reminder tasks are enqueued on
    pub queue_name: String,
    /// How long completed tasks remain inspectable
    pub task_retention: Duration,
    /// Unique-key lock preventing duplicate enqueue of one occurrence
    pub unique_ttl: Duration,
    /// Upper bound for a single queue call
    pub queue_timeout: Duration,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    /// Zero disables the periodic sweep (startup sweep still runs)
    pub reconcile_interval: Duration,
    pub notifiers_config_path: String,
    /// Channels used when a reminder or request lists none
    pub default_channels: Vec<Channel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "remindr.db".to_string(),
            log_level: "info".to_string(),
            queue_name: "reminders".to_string(),
            task_retention: Duration::from_secs(24 * 3600),
            unique_ttl: Duration::from_secs(60),
            queue_timeout: Duration::from_secs(10),
            worker_concurrency: 10,
            poll_interval: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(300),
            notifiers_config_path: "notifiers.yaml".to_string(),
            default_channels: vec![Channel::Email],
        }
    }
}

impl Config {
    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let default_channels = match get("DEFAULT_CHANNELS") {
            Some(raw) => parse_channels(&raw)?,
            None => defaults.default_channels,
        };

        let worker_concurrency = parse_number(&get, "WORKER_CONCURRENCY", 10)? as usize;
        if worker_concurrency == 0 {
            return Err(anyhow!("WORKER_CONCURRENCY must be at least 1"));
        }

        Ok(Self {
            database_path: get("DATABASE_PATH").unwrap_or(defaults.database_path),
            log_level: get("LOG_LEVEL").unwrap_or(defaults.log_level),
            queue_name: get("REMINDER_QUEUE").unwrap_or(defaults.queue_name),
            task_retention: Duration::from_secs(
                parse_number(&get, "TASK_RETENTION_HOURS", 24)? * 3600,
            ),
            unique_ttl: Duration::from_secs(parse_number(&get, "TASK_UNIQUE_TTL_SECS", 60)?),
            queue_timeout: Duration::from_secs(parse_number(&get, "QUEUE_TIMEOUT_SECS", 10)?),
            worker_concurrency,
            poll_interval: Duration::from_millis(parse_number(
                &get,
                "QUEUE_POLL_INTERVAL_MS",
                500,
            )?),
            reconcile_interval: Duration::from_secs(parse_number(
                &get,
                "RECONCILE_INTERVAL_SECS",
                300,
            )?),
            notifiers_config_path: get("NOTIFIERS_CONFIG_PATH")
                .unwrap_or(defaults.notifiers_config_path),
            default_channels,
        })
    }
}

fn parse_number<F>(get: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| anyhow!("Invalid value for {key} ({raw:?}): {e}")),
        None => Ok(default),
    }
}

fn parse_channels(raw: &str) -> Result<Vec<Channel>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Channel>())
        .collect()
}
