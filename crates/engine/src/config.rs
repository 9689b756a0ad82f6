//! Sync configuration: target election, API base and poll cadence.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::Resource;

/// Polls faster than this are rejected.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

const CONFIG_PATH_ENV: &str = "ARLO_SYNC_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub election_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub poll_intervals: PollIntervals,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            election_id: None,
            request_timeout_secs: default_request_timeout_secs(),
            poll_intervals: PollIntervals::default(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(election_id) = &self.election_id
            && election_id.trim().is_empty()
        {
            return Err(ConfigError::invalid("electionId must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid("requestTimeoutSecs must be at least 1"));
        }
        self.poll_intervals.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn interval_for(&self, resource: &Resource) -> Duration {
        self.poll_intervals.interval_for(resource)
    }
}

/// Poll periods per resource, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PollIntervals {
    pub audit_status_ms: u64,
    pub rounds_ms: u64,
    pub jurisdictions_ms: u64,
    pub contests_ms: u64,
    pub ballots_ms: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            audit_status_ms: 2_000,
            rounds_ms: 5_000,
            jurisdictions_ms: 5_000,
            contests_ms: 10_000,
            ballots_ms: 3_000,
        }
    }
}

impl PollIntervals {
    fn entries(&self) -> [(&'static str, u64); 5] {
        [
            ("auditStatusMs", self.audit_status_ms),
            ("roundsMs", self.rounds_ms),
            ("jurisdictionsMs", self.jurisdictions_ms),
            ("contestsMs", self.contests_ms),
            ("ballotsMs", self.ballots_ms),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.entries().into_iter().find(|(_, millis)| *millis < MIN_POLL_INTERVAL_MS) {
            Some((name, millis)) => Err(ConfigError::invalid(format!(
                "pollIntervals.{name} is {millis} ms; the minimum is {MIN_POLL_INTERVAL_MS} ms"
            ))),
            None => Ok(()),
        }
    }

    pub fn interval_for(&self, resource: &Resource) -> Duration {
        let millis = match resource {
            Resource::AuditStatus => self.audit_status_ms,
            Resource::Rounds => self.rounds_ms,
            Resource::Jurisdictions => self.jurisdictions_ms,
            Resource::Contests => self.contests_ms,
            Resource::BoardBallots(_) => self.ballots_ms,
        };
        Duration::from_millis(millis)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if path == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(path)
}

/// Returns the default path for the sync configuration file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir().unwrap_or_else(|| PathBuf::from(".")).join("arlo").join("sync.json")
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<SyncConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads and validates configuration from `path`. A missing file yields defaults.
pub fn load_config_from_path(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        return Ok(SyncConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: SyncConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
