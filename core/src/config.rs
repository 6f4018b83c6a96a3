//! Client configuration.
//!
//! `ClientConfig` can be deserialized from any serde source or read from the
//! `CHANGESET_*` environment variables. The access token is a static bearer
//! token; acquiring and refreshing it is left to the caller.

use std::fmt;

use serde::Deserialize;

use crate::error::TransportError;

pub const DEFAULT_API_VERSION: &str = "9.2";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ENV_BASE_URL: &str = "CHANGESET_BASE_URL";
const ENV_API_VERSION: &str = "CHANGESET_API_VERSION";
const ENV_ACCESS_TOKEN: &str = "CHANGESET_ACCESS_TOKEN";
const ENV_TIMEOUT_SECS: &str = "CHANGESET_TIMEOUT_SECS";

#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Service origin, e.g. `https://org.example.com`.
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Keeps the token out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("has_access_token", &self.access_token.is_some())
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_version: default_api_version(),
            access_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn from_env() -> Result<Self, TransportError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment-shaped).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TransportError> {
        let base_url = lookup(ENV_BASE_URL)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| TransportError::InvalidConfig(format!("{ENV_BASE_URL} is not set")))?;

        let mut config = Self::new(&base_url);
        if let Some(version) = lookup(ENV_API_VERSION) {
            config.api_version = version;
        }
        config.access_token = lookup(ENV_ACCESS_TOKEN).filter(|token| !token.is_empty());
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            config.timeout_secs = raw.trim().parse().map_err(|_| {
                TransportError::InvalidConfig(format!("{ENV_TIMEOUT_SECS} is not a number: {raw}"))
            })?;
        }
        Ok(config)
    }

    /// Origin without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Path of the versioned API root, e.g. `/api/data/v9.2`.
    pub fn api_root_path(&self) -> String {
        format!("/api/data/v{}", self.api_version)
    }
}
