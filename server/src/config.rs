//! Configuration management for the server.

use std::env;

/// Default number of snapshots per pull page.
pub const DEFAULT_PULL_LIMIT: usize = 100;

/// Upper bound on a requested pull page.
pub const DEFAULT_PULL_MAX_LIMIT: usize = 1000;

/// Upper bound on mutations in one push.
pub const DEFAULT_PUSH_MAX_MUTATIONS: usize = 500;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared bearer token; anonymous access when unset
    pub auth_secret: Option<String>,
    /// Page size when a pull names no limit
    pub pull_default_limit: usize,
    /// Largest page a pull may request
    pub pull_max_limit: usize,
    /// Largest batch a push may carry
    pub push_max_mutations: usize,
}

impl Config {
    /// Configuration with defaults for everything but the database.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: database_url.into(),
            auth_secret: None,
            pull_default_limit: DEFAULT_PULL_LIMIT,
            pull_max_limit: DEFAULT_PULL_MAX_LIMIT,
            push_max_mutations: DEFAULT_PUSH_MAX_MUTATIONS,
        }
    }

    /// Require `secret` as the bearer token.
    pub fn with_auth_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(secret.into());
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)?;
        let mut config = Self::new(database_url);

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidPort)?;
        }
        config.auth_secret = env::var("AUTH_SECRET").ok().filter(|s| !s.is_empty());
        config.pull_default_limit = limit_var("PULL_DEFAULT_LIMIT", config.pull_default_limit)?;
        config.pull_max_limit = limit_var("PULL_MAX_LIMIT", config.pull_max_limit)?;
        config.push_max_mutations = limit_var("PUSH_MAX_MUTATIONS", config.push_max_mutations)?;

        if config.pull_default_limit > config.pull_max_limit {
            return Err(ConfigError::InvalidLimit("PULL_DEFAULT_LIMIT"));
        }
        Ok(config)
    }

    /// Clamp a requested pull page size to the configured bounds.
    pub fn pull_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.pull_default_limit)
            .clamp(1, self.pull_max_limit)
    }
}

fn limit_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(value) => match value.parse() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidLimit(name)),
            Ok(limit) => Ok(limit),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidLimit(&'static str),
}
