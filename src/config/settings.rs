//! Settings loaded from a JSON config file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::XdgDirs;
use crate::discovery::DiscoveryMode;
use crate::listener::{RestartPolicy, RunnerCommand, MIN_RESTART_DELAY};
use crate::store::RedisConfig;

/// File name looked up in the working and config directories.
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Runtime settings. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis_host: String,
    pub redis_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_password: Option<String>,
    pub redis_db: i64,

    /// Laravel project directory, or a command prefix such as
    /// `docker exec app`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artisan_path: Option<String>,
    /// Explicit runner executable, replacing the artisan resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener_command: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listener_args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listener_consumer: Option<String>,

    pub discovery: DiscoveryMode,
    pub scan_interval_ms: u64,
    pub read_retry_ms: u64,
    pub tap_error_delay_ms: u64,
    pub max_tap_errors: u32,
    pub restart_backoff_initial_ms: u64,
    pub restart_backoff_max_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            redis_db: 0,
            artisan_path: None,
            listener_command: None,
            listener_args: Vec::new(),
            listener_group: None,
            listener_consumer: None,
            discovery: DiscoveryMode::Monitor,
            scan_interval_ms: 1000,
            read_retry_ms: 1000,
            tap_error_delay_ms: 200,
            max_tap_errors: 5,
            restart_backoff_initial_ms: 500,
            restart_backoff_max_ms: 30_000,
        }
    }
}

impl Settings {
    /// Load settings.
    ///
    /// An explicit path must exist. Otherwise `./config.json` and then the
    /// XDG config file are tried, and defaults are used when neither
    /// exists. Returns the file actually read, if any.
    pub fn load(
        explicit: Option<&Path>,
        dirs: &XdgDirs,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_path(path)?, Some(path.to_path_buf())));
        }

        let candidates = [PathBuf::from(CONFIG_FILE_NAME), dirs.config_file()];
        Self::load_first(&candidates)
    }

    /// Load the first existing file among `candidates`, or defaults.
    pub fn load_first(candidates: &[PathBuf]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in candidates {
            if path.is_file() {
                return Ok((Self::load_from_path(path)?, Some(path.clone())));
            }
        }
        debug!("No config file found, using defaults");
        Ok((Self::default(), None))
    }

    /// Load settings from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config");
        Ok(settings)
    }

    /// Pretty JSON form, as printed by `--print-config`.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            host: self.redis_host.clone(),
            port: self.redis_port,
            password: self.redis_password.clone().filter(|p| !p.is_empty()),
            db: self.redis_db,
        }
    }

    /// The consumer runner to probe and launch.
    pub fn runner_command(&self) -> RunnerCommand {
        match self.listener_command.as_deref().filter(|c| !c.is_empty()) {
            Some(program) => RunnerCommand::new(program, self.listener_args.iter().cloned()),
            None => RunnerCommand::artisan(self.artisan_path.as_deref()),
        }
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        let initial_delay =
            Duration::from_millis(self.restart_backoff_initial_ms).max(MIN_RESTART_DELAY);
        RestartPolicy {
            initial_delay,
            max_delay: Duration::from_millis(self.restart_backoff_max_ms).max(initial_delay),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }

    pub fn tap_error_delay(&self) -> Duration {
        Duration::from_millis(self.tap_error_delay_ms)
    }
}
