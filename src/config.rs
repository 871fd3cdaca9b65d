//! Tool configuration, loaded from an optional TOML file.
//!
//! Every key is optional:
//!
//! ```toml
//! address = "GPIB0::28::INSTR"
//! adapter_port = "/dev/ttyUSB0"
//! timeout_ms = 5000
//! status_timeout_ms = 500
//! monitor_interval_ms = 2000
//! presets_file = "presets.json"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{AddressError, ResourceAddress};
use crate::session::{DEFAULT_SETTLE_TIME, DEFAULT_STATUS_TIMEOUT, DEFAULT_TIMEOUT};

/// Baud rate is ignored by USB adapters, but the port still needs one.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read configuration {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Instrument address, `GPIB<board>::<primary>::INSTR` or `prologix::<port>::<primary>`.
    pub address: String,
    /// Serial port of the GPIB adapter, used when the address does not name one.
    pub adapter_port: Option<String>,
    pub baud_rate: u32,
    /// Deadline for opening the link and for readback queries.
    pub timeout_ms: u64,
    /// Deadline for `*ESR?`.
    pub status_timeout_ms: u64,
    /// Deadline for each query of a status snapshot.
    pub readback_timeout_ms: u64,
    /// Pause after every command.
    pub settle_ms: u64,
    /// Period of status snapshots while monitoring.
    pub monitor_interval_ms: u64,
    /// Time spent on each playlist entry while hopping.
    pub dwell_ms: u64,
    pub presets_file: PathBuf,
    pub playlist_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: ResourceAddress::default().to_string(),
            adapter_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            status_timeout_ms: DEFAULT_STATUS_TIMEOUT.as_millis() as u64,
            readback_timeout_ms: 1000,
            settle_ms: DEFAULT_SETTLE_TIME.as_millis() as u64,
            monitor_interval_ms: 2000,
            dwell_ms: 2000,
            presets_file: PathBuf::from("presets.json"),
            playlist_file: None,
        }
    }
}

impl Config {
    /// Load `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.address()?;
        let deadlines = [
            ("timeout_ms", self.timeout_ms),
            ("status_timeout_ms", self.status_timeout_ms),
            ("readback_timeout_ms", self.readback_timeout_ms),
            ("monitor_interval_ms", self.monitor_interval_ms),
        ];
        for (key, value) in deadlines {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{} must be > 0", key)));
            }
        }
        Ok(())
    }

    pub fn address(&self) -> Result<ResourceAddress, ConfigError> {
        Ok(self.address.parse()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn readback_timeout(&self) -> Duration {
        Duration::from_millis(self.readback_timeout_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}
