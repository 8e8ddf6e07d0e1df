//! Session configuration

use std::{env, path::PathBuf, time::Duration};

use reqwest::Url;
use thiserror::Error;

/// Environment variable holding the API base URL
pub const API_BASE_VAR: &str = "POSTDECK_API_BASE";
/// Environment variable holding the refresh timeout, in seconds
pub const REFRESH_TIMEOUT_VAR: &str = "POSTDECK_REFRESH_TIMEOUT_SECS";
/// Environment variable holding the path of the credential file
pub const CREDENTIALS_FILE_VAR: &str = "POSTDECK_CREDENTIALS_FILE";

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a session against the postdeck API
#[derive(Clone, Debug)]
pub struct SessionConfig {
    api_base: Url,
    refresh_timeout: Duration,
    credential_file: Option<PathBuf>,
}

impl SessionConfig {
    /// Constructs a new configuration for the API rooted at `api_base`
    ///
    /// Uses a refresh timeout of 10 seconds and keeps credentials in memory.
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            credential_file: None,
        }
    }

    /// Loads the configuration from the process environment
    ///
    /// `POSTDECK_API_BASE` is required. `POSTDECK_REFRESH_TIMEOUT_SECS` and
    /// `POSTDECK_CREDENTIALS_FILE` are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base = env::var(API_BASE_VAR).map_err(|_| ConfigError::Missing(API_BASE_VAR))?;
        let api_base = Url::parse(&api_base).map_err(|source| ConfigError::InvalidUrl {
            value: api_base,
            source,
        })?;

        let mut config = Self::new(api_base);

        if let Ok(secs) = env::var(REFRESH_TIMEOUT_VAR) {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidTimeout(secs))?;
            config = config.with_refresh_timeout(Duration::from_secs(secs));
        }

        if let Some(path) = env::var_os(CREDENTIALS_FILE_VAR) {
            config = config.with_credential_file(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Sets how long a refresh may take before it is treated as failed
    pub fn with_refresh_timeout(mut self, refresh_timeout: Duration) -> Self {
        self.refresh_timeout = refresh_timeout;
        self
    }

    /// Persists the credential to `path` so that it survives restarts
    pub fn with_credential_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_file = Some(path.into());
        self
    }

    /// The base URL of the API
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    /// The refresh timeout
    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    /// The credential file, if the credential is persisted
    pub fn credential_file(&self) -> Option<&std::path::Path> {
        self.credential_file.as_deref()
    }

    /// Resolves `path` against the API base URL
    ///
    /// Leading slashes in `path` are relative to the base, so a base of
    /// `https://api.example.com/v1` and a path of `/user/tags` yields
    /// `https://api.example.com/v1/user/tags`.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        join_endpoint(&self.api_base, path)
    }
}

/// Resolves `path` against `base`, keeping the path of `base`
pub fn join_endpoint(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut joined = base.as_str().trim_end_matches('/').to_owned();
    joined.push('/');
    joined.push_str(path.trim_start_matches('/'));
    Url::parse(&joined)
}

/// An error while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    /// The API base URL could not be parsed
    #[error("invalid API base URL {value:?}")]
    InvalidUrl {
        /// The rejected value
        value: String,
        /// The parse failure
        source: url::ParseError,
    },
    /// The refresh timeout is not a whole number of seconds
    #[error("invalid refresh timeout {0:?}; expected whole seconds")]
    InvalidTimeout(String),
}
