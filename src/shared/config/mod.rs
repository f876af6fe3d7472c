//! Engine configuration module
//!
//! Tunables for sessions and connections. Values come from defaults, an
//! optional TOML file and `COLLAB_*` environment variables, in that order.
//!
//! ```toml
//! flush_interval_secs = 30
//! flush_threshold = 50
//! mailbox_capacity = 256
//! pong_wait_secs = 60
//! write_wait_secs = 10
//! max_message_size = 524288
//! stop_grace_ms = 200
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 50;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512 * 1024;
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(200);

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Wall-clock interval between scheduled flushes
    pub flush_interval: Duration,
    /// Unflushed versions that trigger an early flush
    pub flush_threshold: u64,
    /// Outbound frames buffered per connection
    pub mailbox_capacity: usize,
    /// Read-liveness timeout, reset by any inbound frame
    pub pong_wait: Duration,
    /// Heartbeat interval; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// A single write stalling longer than this fails the connection
    pub write_wait: Duration,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
    /// Delivery window for a closing broadcast before connections are severed
    pub stop_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period_for(DEFAULT_PONG_WAIT),
            write_wait: DEFAULT_WRITE_WAIT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

/// On-disk representation; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EngineConfigFile {
    flush_interval_secs: Option<u64>,
    flush_threshold: Option<u64>,
    mailbox_capacity: Option<usize>,
    pong_wait_secs: Option<u64>,
    ping_period_secs: Option<u64>,
    write_wait_secs: Option<u64>,
    max_message_size: Option<usize>,
    stop_grace_ms: Option<u64>,
}

impl EngineConfig {
    /// Create a new EngineConfigBuilder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: EngineConfigFile = toml::from_str(raw)?;
        let mut builder = Self::builder();
        if let Some(secs) = file.flush_interval_secs {
            builder = builder.flush_interval(Duration::from_secs(secs));
        }
        if let Some(threshold) = file.flush_threshold {
            builder = builder.flush_threshold(threshold);
        }
        if let Some(capacity) = file.mailbox_capacity {
            builder = builder.mailbox_capacity(capacity);
        }
        if let Some(secs) = file.pong_wait_secs {
            builder = builder.pong_wait(Duration::from_secs(secs));
        }
        if let Some(secs) = file.ping_period_secs {
            builder = builder.ping_period(Duration::from_secs(secs));
        }
        if let Some(secs) = file.write_wait_secs {
            builder = builder.write_wait(Duration::from_secs(secs));
        }
        if let Some(size) = file.max_message_size {
            builder = builder.max_message_size(size);
        }
        if let Some(ms) = file.stop_grace_ms {
            builder = builder.stop_grace(Duration::from_millis(ms));
        }
        builder.build()
    }

    /// Apply `COLLAB_*` environment variables on top of `self`
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(secs) = env_number::<u64>("COLLAB_FLUSH_INTERVAL_SECS")? {
            self.flush_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_number::<u64>("COLLAB_FLUSH_THRESHOLD")? {
            self.flush_threshold = threshold;
        }
        if let Some(capacity) = env_number::<usize>("COLLAB_MAILBOX_CAPACITY")? {
            self.mailbox_capacity = capacity;
        }
        if let Some(size) = env_number::<usize>("COLLAB_MAX_MESSAGE_SIZE")? {
            self.max_message_size = size;
        }
        if let Some(secs) = env_number::<u64>("COLLAB_PONG_WAIT_SECS")? {
            self.pong_wait = Duration::from_secs(secs);
            self.ping_period = ping_period_for(self.pong_wait);
        }
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval.is_zero() {
            return Err(ConfigError::invalid("flush_interval", "must be greater than zero"));
        }
        if self.flush_threshold == 0 {
            return Err(ConfigError::invalid("flush_threshold", "must be at least 1"));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::invalid("mailbox_capacity", "must be at least 1"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::invalid("max_message_size", "must be at least 1"));
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::invalid(
                "ping_period",
                format!(
                    "must be non-zero and shorter than pong_wait ({:?})",
                    self.pong_wait
                ),
            ));
        }
        Ok(())
    }
}

fn env_number<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("not a number: {:?}", raw))),
        Err(_) => Ok(None),
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    flush_interval: Option<Duration>,
    flush_threshold: Option<u64>,
    mailbox_capacity: Option<usize>,
    pong_wait: Option<Duration>,
    ping_period: Option<Duration>,
    write_wait: Option<Duration>,
    max_message_size: Option<usize>,
    stop_grace: Option<Duration>,
}

impl EngineConfigBuilder {
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn flush_threshold(mut self, threshold: u64) -> Self {
        self.flush_threshold = Some(threshold);
        self
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    /// Set the read-liveness timeout; the heartbeat follows at 9/10 unless set explicitly
    pub fn pong_wait(mut self, wait: Duration) -> Self {
        self.pong_wait = Some(wait);
        self
    }

    pub fn ping_period(mut self, period: Duration) -> Self {
        self.ping_period = Some(period);
        self
    }

    pub fn write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = Some(wait);
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        let defaults = EngineConfig::default();
        let pong_wait = self.pong_wait.unwrap_or(defaults.pong_wait);
        let config = EngineConfig {
            flush_interval: self.flush_interval.unwrap_or(defaults.flush_interval),
            flush_threshold: self.flush_threshold.unwrap_or(defaults.flush_threshold),
            mailbox_capacity: self.mailbox_capacity.unwrap_or(defaults.mailbox_capacity),
            pong_wait,
            ping_period: self.ping_period.unwrap_or_else(|| ping_period_for(pong_wait)),
            write_wait: self.write_wait.unwrap_or(defaults.write_wait),
            max_message_size: self.max_message_size.unwrap_or(defaults.max_message_size),
            stop_grace: self.stop_grace.unwrap_or(defaults.stop_grace),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
