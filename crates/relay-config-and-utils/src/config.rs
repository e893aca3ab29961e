//! Configuration management for the relay.

use crate::{CoreError, CoreResult};
use observability::LogFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Default delay between the end of one tick and the start of the next.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default number of events claimed per tick.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Default attempt ceiling.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 10;

/// Default backoff base unit.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 30_000;

/// Default SQLite database file.
pub const DEFAULT_DATABASE_PATH: &str = "outbox.db";

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default broker I/O timeout.
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 5_000;

/// Default time a claimed batch stays leased to the claiming relay.
pub const DEFAULT_CLAIM_LEASE_MS: u64 = 300_000;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Which event family a relay instance drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Authentication events (restore-access mails).
    Auth,
    /// Profile search-indexing events.
    #[default]
    Profile,
}

impl RelayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Profile => "profile",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auth" => Ok(Self::Auth),
            "profile" => Ok(Self::Profile),
            other => Err(CoreError::Config(format!(
                "unknown relay mode '{}', expected 'auth' or 'profile'",
                other
            ))),
        }
    }
}

/// Relay configuration.
///
/// Every field is optional in the JSON file; missing fields take the
/// defaults above. `batch_size` and `max_attempts` are kept as given and
/// clamped to at least 1 where they are used, so a misconfigured value never
/// stops the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether this instance relays at all.
    pub enabled: bool,
    /// Event family drained by this instance.
    pub mode: RelayMode,
    /// Delay between tick completions.
    pub poll_interval_ms: u64,
    /// Max events claimed per tick.
    pub batch_size: i64,
    /// Attempt ceiling before an event is no longer claimed.
    pub max_attempts: i64,
    /// Backoff base unit (floored at one second when used).
    pub retry_delay_ms: u64,
    /// Path to the SQLite outbox database.
    pub database_path: PathBuf,
    /// Redis URL of the broker.
    pub redis_url: String,
    /// Read/write timeout for a single publish.
    pub publish_timeout_ms: u64,
    /// Optional approximate cap on stream length.
    pub stream_max_len: Option<u64>,
    /// How long a claimed batch is hidden from other claimers.
    pub claim_lease_ms: u64,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RelayMode::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            stream_max_len: None,
            claim_lease_ms: DEFAULT_CLAIM_LEASE_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl RelayConfig {
    /// Load configuration: defaults, then the file (if given; it must exist),
    /// then environment variables.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            Some(path) => {
                return Err(CoreError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )))
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RelayConfig = serde_json::from_str(&content)?;
        debug!(path = %path.display(), mode = %config.mode, "Loaded relay config file");
        Ok(config)
    }

    /// Override fields from environment-style lookups.
    ///
    /// Empty values are ignored; values that do not parse are errors.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("OUTBOX_RELAY_ENABLED") {
            self.enabled = parse_bool("OUTBOX_RELAY_ENABLED", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_MODE") {
            self.mode = value.parse()?;
        }
        if let Some(value) = get("OUTBOX_RELAY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("OUTBOX_RELAY_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_BATCH_SIZE") {
            self.batch_size = parse_number("OUTBOX_RELAY_BATCH_SIZE", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_MAX_ATTEMPTS") {
            self.max_attempts = parse_number("OUTBOX_RELAY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_RETRY_DELAY_MS") {
            self.retry_delay_ms = parse_number("OUTBOX_RELAY_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_DATABASE_PATH") {
            self.database_path = PathBuf::from(value.trim());
        }
        if let Some(value) = get("REDIS_URL") {
            self.redis_url = value.trim().to_string();
        }
        if let Some(value) = get("OUTBOX_RELAY_PUBLISH_TIMEOUT_MS") {
            self.publish_timeout_ms = parse_number("OUTBOX_RELAY_PUBLISH_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_STREAM_MAX_LEN") {
            self.stream_max_len = Some(parse_number("OUTBOX_RELAY_STREAM_MAX_LEN", &value)?);
        }
        if let Some(value) = get("OUTBOX_RELAY_CLAIM_LEASE_MS") {
            self.claim_lease_ms = parse_number("OUTBOX_RELAY_CLAIM_LEASE_MS", &value)?;
        }
        if let Some(value) = get("OUTBOX_RELAY_LOG_LEVEL") {
            self.log_level = value.trim().to_string();
        }
        if let Some(value) = get("OUTBOX_RELAY_LOG_FORMAT") {
            self.log_format = LogFormat::parse(&value).ok_or_else(|| {
                CoreError::Config(format!(
                    "OUTBOX_RELAY_LOG_FORMAT must be 'text' or 'json', got '{}'",
                    value.trim()
                ))
            })?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}

fn parse_bool(key: &str, value: &str) -> CoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(CoreError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value.trim().parse().map_err(|_| {
        CoreError::Config(format!("{} must be a number, got '{}'", key, value.trim()))
    })
}
