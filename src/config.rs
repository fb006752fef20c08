//! Configuration types for bookdl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Scheduler behavior (polling, book-level concurrency, refill size)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between ticks (default: 15 seconds)
    #[serde(default = "default_tick_interval", with = "duration_serde")]
    pub tick_interval: Duration,

    /// Maximum books downloading at once (default: 1)
    #[serde(default = "default_max_concurrent_books")]
    pub max_concurrent_books: usize,

    /// Maximum pending records loaded per refill (default: 100)
    #[serde(default = "default_refill_limit")]
    pub refill_limit: u32,

    /// How long shutdown waits for in-flight books (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            max_concurrent_books: default_max_concurrent_books(),
            refill_limit: default_refill_limit(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Per-book download behavior (chapter fan-out, timeouts, retry)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Concurrent chapter fetches within one book (default: 5)
    #[serde(default = "default_chapter_concurrency")]
    pub chapter_concurrency: usize,

    /// Upper bound for a single chapter fetch, retries included (default: 60 seconds)
    #[serde(default = "default_chapter_timeout", with = "duration_serde")]
    pub chapter_timeout: Duration,

    /// Retry policy for transient chapter fetch failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chapter_concurrency: default_chapter_concurrency(),
            chapter_timeout: default_chapter_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 2)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 500 milliseconds)
    #[serde(default = "default_initial_delay", with = "duration_millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "duration_millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

/// Data storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./bookdl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Chapter content gateway used by [`HttpBookClient`](crate::client::HttpBookClient)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL the content locators are resolved against
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Per-book download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Content gateway settings
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_books == 0 {
            return Err(config_error(
                "max_concurrent_books must be at least 1",
                "max_concurrent_books",
            ));
        }
        if self.scheduler.refill_limit == 0 {
            return Err(config_error(
                "refill_limit must be at least 1",
                "refill_limit",
            ));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(config_error(
                "tick_interval must be greater than zero",
                "tick_interval",
            ));
        }
        if self.download.chapter_concurrency == 0 {
            return Err(config_error(
                "chapter_concurrency must be at least 1",
                "chapter_concurrency",
            ));
        }
        if self.download.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be at least 1.0",
                "backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_max_concurrent_books() -> usize {
    1
}

fn default_refill_limit() -> u32 {
    100
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_chapter_concurrency() -> usize {
    5
}

fn default_chapter_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bookdl.db")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(15));
        assert_eq!(config.scheduler.max_concurrent_books, 1);
        assert_eq!(config.scheduler.refill_limit, 100);
        assert_eq!(config.download.chapter_concurrency, 5);
        assert_eq!(config.download.retry.max_attempts, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");
        assert_eq!(config.scheduler.refill_limit, 100);
        assert_eq!(config.persistence.database_path, PathBuf::from("bookdl.db"));
        assert_eq!(config.client.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn durations_use_seconds_and_millis() {
        let json = r#"{
            "scheduler": { "tick_interval": 2, "max_concurrent_books": 3 },
            "download": { "retry": { "initial_delay": 250, "max_delay": 4000 } }
        }"#;
        let config: Config = serde_json::from_str(json).expect("deserialize failed");
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(2));
        assert_eq!(config.scheduler.max_concurrent_books, 3);
        assert_eq!(config.download.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.download.retry.max_delay, Duration::from_secs(4));

        let back = serde_json::to_value(&config).expect("serialize failed");
        assert_eq!(back["download"]["retry"]["initial_delay"], 250);
        assert_eq!(back["scheduler"]["tick_interval"], 2);
    }

    #[test]
    fn validate_names_the_offending_key() {
        let mut config = Config::default();
        config.scheduler.max_concurrent_books = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("max_concurrent_books"))
            }
            other => panic!("expected config error, got {:?}", other),
        }

        let mut config = Config::default();
        config.download.chapter_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
