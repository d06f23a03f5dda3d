//! Application configuration management.
//!
//! This module handles loading, parsing, and validating the application configuration
//! from a TOML file and `RADIOZOA__*` environment variables, with support for runtime
//! overrides from CLI arguments.

use crate::configurator::ConfigureTiming;
use crate::device::{DEVICE_COUNT, DeviceTable, Variant};
use crate::error::{ConfigError, Result, TableError};
use crate::led::LedKind;
use crate::ranging::color::OverRange;
use crate::ranging::{self, DEFAULT_PERIOD_MS};
use crate::sensors::array::DEFAULT_OFFSET_MM;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub bus: BusConfig,
    pub board: BoardConfig,
    pub configurator: ConfiguratorConfig,
    pub ranging: RangingConfig,
    pub led: LedConfig,
    pub logging: LoggingConfig,
}

/// I2C bus configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    pub device: String,
}

/// Which sensor model is fitted in each slot
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BoardConfig {
    /// One entry per slot in index order; unset means eight long-range sensors
    pub variants: Option<[Variant; DEVICE_COUNT]>,
}

impl BoardConfig {
    /// Build the validated device table for this board
    pub fn table(&self) -> std::result::Result<DeviceTable, TableError> {
        match self.variants {
            Some(variants) => DeviceTable::with_variants(variants),
            None => DeviceTable::radiozoa(),
        }
    }
}

/// Address configuration timing
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConfiguratorConfig {
    pub shutdown_settle_ms: u32,
    pub presence_attempts: u32,
    pub presence_poll_ms: u32,
    pub address_settle_ms: u32,
    pub device_settle_ms: u32,
    pub rescan_delay_ms: u32,
    pub reset_hold_ms: u32,
}

/// Ranging loop configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RangingConfig {
    pub period_ms: u64,
    pub offset_mm: u16,
    pub over_range: OverRange,
    pub auto_start: bool,
}

/// LED output configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LedConfig {
    pub kind: LedKind,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: "/dev/i2c-1".to_string(),
        }
    }
}

impl Default for ConfiguratorConfig {
    fn default() -> Self {
        ConfigureTiming::default().into()
    }
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_PERIOD_MS,
            offset_mm: DEFAULT_OFFSET_MM,
            over_range: OverRange::Fold,
            auto_start: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl From<ConfigureTiming> for ConfiguratorConfig {
    fn from(t: ConfigureTiming) -> Self {
        Self {
            shutdown_settle_ms: t.shutdown_settle_ms,
            presence_attempts: t.presence_attempts,
            presence_poll_ms: t.presence_poll_ms,
            address_settle_ms: t.address_settle_ms,
            device_settle_ms: t.device_settle_ms,
            rescan_delay_ms: t.rescan_delay_ms,
            reset_hold_ms: t.reset_hold_ms,
        }
    }
}

impl From<&ConfiguratorConfig> for ConfigureTiming {
    fn from(c: &ConfiguratorConfig) -> Self {
        Self {
            shutdown_settle_ms: c.shutdown_settle_ms,
            presence_attempts: c.presence_attempts,
            presence_poll_ms: c.presence_poll_ms,
            address_settle_ms: c.address_settle_ms,
            device_settle_ms: c.device_settle_ms,
            rescan_delay_ms: c.rescan_delay_ms,
            reset_hold_ms: c.reset_hold_ms,
        }
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

impl AppConfig {
    /// Load configuration from a TOML file (optional) and the environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("RADIOZOA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(ConfigError::from)?;

        let config: AppConfig = settings.try_deserialize().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.bus.device.is_empty() {
            return Err(invalid("bus.device", "cannot be empty").into());
        }

        if self.configurator.presence_attempts == 0 {
            return Err(invalid("configurator.presence_attempts", "must be greater than 0").into());
        }

        self.board.table()?;

        ranging::validate_period(self.ranging.period_ms)
            .map_err(|e| invalid("ranging.period_ms", &e.to_string()))?;

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid("logging.level", "must be trace, debug, info, warn or error").into());
        }

        Ok(())
    }

    /// Apply CLI argument overrides to configuration
    pub fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(period) = cli.period_ms {
            self.ranging.period_ms = period;
        }

        if let Some(level) = cli.log_level {
            self.logging.level = level.to_filter_string().to_string();
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()).into())
    }
}
