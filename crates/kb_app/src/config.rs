//! `kb.ron` configuration.
//!
//! Every field is optional in the file; missing fields take the defaults
//! below. `KB_API_BASE_URL` in the environment replaces `base_url`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kb_engine::{ApiSettings, PollSettings};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "kb.ron";
pub const BASE_URL_ENV: &str = "KB_API_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unknown log level '{0}'")]
    LogLevel(String),
    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub vectorize_timeout_secs: u64,
    pub generation_timeout_secs: u64,
    pub max_export_bytes: u64,
    pub poll_initial_delay_ms: u64,
    pub poll_multiplier: f64,
    pub poll_max_delay_ms: u64,
    pub poll_timeout_secs: u64,
    pub poll_attempt_timeout_secs: u64,
    /// Where the session snapshot and exports go.
    pub state_dir: PathBuf,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let api = ApiSettings::default();
        let poll = PollSettings::default();
        Self {
            base_url: api.base_url,
            connect_timeout_secs: api.connect_timeout.as_secs(),
            request_timeout_secs: api.request_timeout.as_secs(),
            vectorize_timeout_secs: api.vectorize_timeout.as_secs(),
            generation_timeout_secs: api.generation_timeout.as_secs(),
            max_export_bytes: api.max_export_bytes,
            poll_initial_delay_ms: poll.initial_delay.as_millis() as u64,
            poll_multiplier: poll.multiplier,
            poll_max_delay_ms: poll.max_delay.as_millis() as u64,
            poll_timeout_secs: poll.timeout.as_secs(),
            poll_attempt_timeout_secs: poll.attempt_timeout.as_secs(),
            state_dir: PathBuf::from(".kb"),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, or `kb.ron` in the working directory when no path is
    /// given. An explicit path must exist; a missing default file yields
    /// the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_ron(&text).map_err(|message| ConfigError::Parse { path, message })
    }

    pub fn from_ron(text: &str) -> Result<Self, String> {
        let config: Self = ron::from_str(text).map_err(|err| err.to_string())?;
        Ok(config)
    }

    /// Applies environment overrides through `lookup` so callers can test
    /// without touching the process environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|value| !value.trim().is_empty()) {
            self.base_url = base_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "base_url",
                requirement: "non-empty",
            });
        }
        if !self.poll_multiplier.is_finite() || self.poll_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "poll_multiplier",
                requirement: "a finite number >= 1.0",
            });
        }
        if self.poll_initial_delay_ms == 0 || self.poll_max_delay_ms < self.poll_initial_delay_ms
        {
            return Err(ConfigError::Invalid {
                field: "poll_max_delay_ms",
                requirement: "at least poll_initial_delay_ms, which must be positive",
            });
        }
        let timeouts = [
            ("poll_timeout_secs", self.poll_timeout_secs),
            ("poll_attempt_timeout_secs", self.poll_attempt_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("vectorize_timeout_secs", self.vectorize_timeout_secs),
            ("generation_timeout_secs", self.generation_timeout_secs),
        ];
        // A zero timeout expires before the first request completes.
        if let Some((field, _)) = timeouts.into_iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid {
                field,
                requirement: "a positive number of seconds",
            });
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        kb_logging::parse_level(&self.log_level)
            .ok_or_else(|| ConfigError::LogLevel(self.log_level.clone()))
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            vectorize_timeout: Duration::from_secs(self.vectorize_timeout_secs),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
            max_export_bytes: self.max_export_bytes,
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            initial_delay: Duration::from_millis(self.poll_initial_delay_ms),
            multiplier: self.poll_multiplier,
            max_delay: Duration::from_millis(self.poll_max_delay_ms),
            timeout: Duration::from_secs(self.poll_timeout_secs),
            attempt_timeout: Duration::from_secs(self.poll_attempt_timeout_secs),
        }
    }
}
