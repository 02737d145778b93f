//! Runtime configuration.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {var}='{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Connection settings for the shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Host (default: "localhost")
    pub host: String,
    /// Port (default: 6379)
    pub port: u16,
    /// Logical database (default: 0)
    pub db: u32,
    /// Full connection string; overrides host/port/db when set.
    pub connection_string: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            connection_string: None,
        }
    }
}

impl CacheSettings {
    pub fn connection_string(&self) -> String {
        self.connection_string
            .clone()
            .unwrap_or_else(|| format!("redis://{}:{}/{}", self.host, self.port, self.db))
    }

    /// Load from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `REDIS_HOST` (default: "localhost")
    /// - `REDIS_PORT` (default: 6379)
    /// - `REDIS_DB` (default: 0)
    /// - `REDIS_CONNECTION_STRING` (default: derived from the three above)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: lookup("REDIS_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "REDIS_PORT")?.unwrap_or(defaults.port),
            db: parse_var(&lookup, "REDIS_DB")?.unwrap_or(defaults.db),
            connection_string: lookup("REDIS_CONNECTION_STRING"),
        })
    }
}

/// Task manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpindleConfig {
    /// In-memory queue worker count (default: 4)
    pub workers: usize,
    /// Deadline for synchronous runs (default: 30s)
    pub run_timeout: Duration,
    /// First backoff step while waiting for a result (default: 5ms)
    pub poll_initial: Duration,
    /// Backoff ceiling (default: 250ms)
    pub poll_max: Duration,
    /// Document collection holding result records (default: "_task_results_")
    pub results_collection: String,
    /// Cache hash holding the latest-result pointers (default: "_task_results_")
    pub results_cache_key: String,
    pub cache: CacheSettings,
}

impl Default for SpindleConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            run_timeout: Duration::from_millis(30_000),
            poll_initial: Duration::from_millis(5),
            poll_max: Duration::from_millis(250),
            results_collection: "_task_results_".to_string(),
            results_cache_key: "_task_results_".to_string(),
            cache: CacheSettings::default(),
        }
    }
}

impl SpindleConfig {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `SPINDLE_WORKERS` - worker count (default: 4)
    /// - `SPINDLE_RUN_TIMEOUT_MS` - synchronous run deadline (default: 30000)
    /// - `SPINDLE_POLL_INITIAL_MS` - first wait step (default: 5)
    /// - `SPINDLE_POLL_MAX_MS` - wait step ceiling (default: 250)
    /// - `SPINDLE_RESULTS_COLLECTION` - result collection (default: "_task_results_")
    /// - `SPINDLE_RESULTS_CACHE_KEY` - pointer hash key (default: "_task_results_")
    /// - plus the `REDIS_*` variables read by [`CacheSettings::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers = parse_var(&lookup, "SPINDLE_WORKERS")?.unwrap_or(defaults.workers);
        if workers == 0 {
            return Err(ConfigError::Invalid {
                var: "SPINDLE_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_var::<u64>(&lookup, var)?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };
        let run_timeout = millis("SPINDLE_RUN_TIMEOUT_MS", defaults.run_timeout)?;
        let poll_initial = millis("SPINDLE_POLL_INITIAL_MS", defaults.poll_initial)?;
        let poll_max = millis("SPINDLE_POLL_MAX_MS", defaults.poll_max)?;
        if poll_initial > poll_max {
            return Err(ConfigError::Invalid {
                var: "SPINDLE_POLL_INITIAL_MS",
                value: poll_initial.as_millis().to_string(),
                reason: "must not exceed SPINDLE_POLL_MAX_MS".to_string(),
            });
        }

        Ok(Self {
            workers,
            run_timeout,
            poll_initial,
            poll_max,
            results_collection: lookup("SPINDLE_RESULTS_COLLECTION")
                .unwrap_or(defaults.results_collection),
            results_cache_key: lookup("SPINDLE_RESULTS_CACHE_KEY")
                .unwrap_or(defaults.results_cache_key),
            cache: CacheSettings::from_lookup(&lookup)?,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set the backoff range used while waiting for a result.
    pub fn with_poll_interval(mut self, initial: Duration, max: Duration) -> Self {
        self.poll_initial = initial;
        self.poll_max = max.max(initial);
        self
    }

    pub fn with_results_collection(mut self, collection: impl Into<String>) -> Self {
        self.results_collection = collection.into();
        self
    }

    pub fn with_results_cache_key(mut self, key: impl Into<String>) -> Self {
        self.results_cache_key = key.into();
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = cache;
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
