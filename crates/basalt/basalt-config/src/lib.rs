use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings shared by every endpoint of one bus file.
///
/// All endpoints of a bus must agree on `path`, `capacity` and `record_size`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    #[serde(default = "defaults::path")]
    pub path: String,
    /// Declared file capacity in bytes, header included.
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,
    /// Payload bytes per slot.
    #[serde(default = "defaults::record_size")]
    pub record_size: usize,
    /// Stall time after which a reader rolls back an uncommitted slot.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
    /// Writers reuse an existing file and tail instead of starting fresh.
    #[serde(default = "defaults::append")]
    pub append: bool,
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
}

mod defaults {
    pub fn path() -> String {
        "/tmp/basalt_bus".into()
    }

    pub fn capacity() -> usize {
        64 << 20 // 64 MiB
    }

    pub fn record_size() -> usize {
        64
    }

    pub fn timeout_ms() -> u64 {
        2000
    }

    pub fn append() -> bool {
        true
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            path: defaults::path(),
            capacity: defaults::capacity(),
            record_size: defaults::record_size(),
            timeout_ms: defaults::timeout_ms(),
            append: defaults::append(),
            log_level: defaults::log_level(),
        }
    }
}

impl BusConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let toml_to_str = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&toml_to_str)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
