use anyhow::Context;
use std::str::FromStr;
use std::time::Duration;

// Runtime knobs for a Scheduler. Every field has a default; `from_env` only
// overrides what is set.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub drain_poll_interval: Duration,
    pub default_concurrency: usize,
    pub default_backoff_ms: u64,
    pub max_backoff_ms: Option<u64>,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            drain_poll_interval: Duration::from_millis(100),
            default_concurrency: 1,
            default_backoff_ms: 1000,
            max_backoff_ms: None,
            event_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let poll_interval = env_parse::<u64>("TICKFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")?
            .map(|ms| Duration::from_millis(ms.max(1)))
            .unwrap_or(defaults.poll_interval);

        let drain_poll_interval =
            env_parse::<u64>("TICKFLOW_DRAIN_POLL_INTERVAL_MS", "DRAIN_POLL_INTERVAL_MS")?
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(defaults.drain_poll_interval);

        let default_concurrency =
            env_parse::<usize>("TICKFLOW_DEFAULT_CONCURRENCY", "DEFAULT_CONCURRENCY")?
                .unwrap_or(defaults.default_concurrency)
                .max(1);

        let default_backoff_ms =
            env_parse::<u64>("TICKFLOW_DEFAULT_BACKOFF_MS", "DEFAULT_BACKOFF_MS")?
                .unwrap_or(defaults.default_backoff_ms);

        // "0", "off", "none" all mean uncapped
        let max_backoff_ms = match env_or_fallback("TICKFLOW_MAX_BACKOFF_MS", "MAX_BACKOFF_MS")
            .and_then(|s| normalize_optional(&s))
        {
            Some(v) => Some(
                v.parse::<u64>()
                    .with_context(|| format!("MAX_BACKOFF_MS is not a number: {v}"))?,
            )
            .filter(|ms| *ms > 0),
            None => None,
        };

        let event_capacity = env_parse::<usize>("TICKFLOW_EVENT_CAPACITY", "EVENT_CAPACITY")?
            .unwrap_or(defaults.event_capacity)
            .max(1);

        Ok(Self {
            poll_interval,
            drain_poll_interval,
            default_concurrency,
            default_backoff_ms,
            max_backoff_ms,
            event_capacity,
        })
    }
}

/// Connection settings for the Postgres mirror.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let url = env_or_fallback("TICKFLOW_DATABASE_URL", "DATABASE_URL")
            .context("DATABASE_URL is required for the postgres adapter")?;

        let max_connections =
            env_parse::<u32>("TICKFLOW_DB_MAX_CONNECTIONS", "DB_MAX_CONNECTIONS")?
                .unwrap_or(4)
                .clamp(1, 32);

        Ok(Self {
            url,
            max_connections,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T>(primary: &str, fallback: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or_fallback(primary, fallback)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{primary} has an invalid value: {raw}"))
        })
        .transpose()
}

fn normalize_optional(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
