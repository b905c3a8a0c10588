//! Configuration for the sync engine.

use matchsync_engine::{BackoffPolicy, ScoreTolerance};
use std::time::Duration;
use thiserror::Error;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between periodic sync cycles.
    pub sync_interval: Duration,
    /// Maximum number of mutations pushed per cycle.
    pub max_batch_size: usize,
    /// Snapshots requested per pull page.
    pub pull_page_size: usize,
    /// Maximum pull pages per cycle.
    pub max_pull_pages: usize,
    /// Retry backoff for transient failures.
    pub backoff: BackoffPolicy,
    /// Agreement tolerance for score confirmation.
    pub tolerance: ScoreTolerance,
    /// Identifies this device to the remote store.
    pub client_id: String,
}

impl SyncConfig {
    /// Creates a configuration with defaults and a random client id.
    pub fn new() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            max_batch_size: 50,
            pull_page_size: 100,
            max_pull_pages: 50,
            backoff: BackoffPolicy::default(),
            tolerance: ScoreTolerance::exact(),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Reads overrides from `MATCHSYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(ms) = env_parse::<u64>("MATCHSYNC_SYNC_INTERVAL_MS")? {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Some(size) = env_parse::<usize>("MATCHSYNC_MAX_BATCH_SIZE")? {
            config.max_batch_size = size;
        }
        if let Some(size) = env_parse::<usize>("MATCHSYNC_PULL_PAGE_SIZE")? {
            config.pull_page_size = size;
        }
        if let Some(ms) = env_parse::<u64>("MATCHSYNC_BACKOFF_BASE_MS")? {
            config.backoff.base = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("MATCHSYNC_BACKOFF_CAP_MS")? {
            config.backoff.cap = Duration::from_millis(ms);
        }
        if let Ok(id) = std::env::var("MATCHSYNC_CLIENT_ID") {
            config.client_id = id;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the push batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the pull page size.
    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size;
        self
    }

    pub fn with_max_pull_pages(mut self, pages: usize) -> Self {
        self.max_pull_pages = pages;
        self
    }

    /// Sets the retry backoff.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the score agreement tolerance.
    pub fn with_tolerance(mut self, tolerance: ScoreTolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Checks that the configuration can drive a scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval.is_zero() {
            return Err(ConfigError::Invalid("sync interval must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max batch size must be positive".into()));
        }
        if self.pull_page_size == 0 || self.max_pull_pages == 0 {
            return Err(ConfigError::Invalid("pull paging must be positive".into()));
        }
        if self.backoff.base.is_zero() || self.backoff.cap < self.backoff.base {
            return Err(ConfigError::Invalid(
                "backoff cap must be at least the positive base delay".into(),
            ));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("client id must not be empty".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
