//! Custom error types for the radiozoa application.
//!
//! This module defines domain-specific error types using thiserror,
//! providing clear error messages and proper error context propagation.

use thiserror::Error;

/// Render a list of bus addresses as `[0x30, 0x33]`.
pub fn fmt_addresses(addresses: &[u8]) -> String {
    let parts: Vec<String> = addresses.iter().map(|a| format!("0x{:02X}", a)).collect();
    format!("[{}]", parts.join(", "))
}

/// Errors raised while building the device table
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("device at slot {slot} has index {index}")]
    IndexOutOfOrder { slot: usize, index: usize },

    #[error("target address 0x{0:02X} assigned to more than one device")]
    DuplicateAddress(u8),

    #[error("target address 0x{address:02X} of device {index} is outside the reserved block")]
    AddressOutOfBlock { index: usize, address: u8 },
}

/// Errors related to address configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigureError {
    #[error("no shutdown pin mapped for device {index}")]
    PinUnavailable { index: usize },

    #[error("no sensor fitted in slot {index}")]
    EmptySlot { index: usize },

    #[error("failed to drive shutdown pin for device {index}: {message}")]
    PinWrite { index: usize, message: String },

    #[error("address write to device {index} (0x{address:02X}) failed: {message}")]
    BusWriteFailure {
        index: usize,
        address: u8,
        message: String,
    },

    #[error(
        "bus verification failed: missing {}, unexpected {}",
        fmt_addresses(.missing),
        fmt_addresses(.unexpected)
    )]
    VerificationMismatch { missing: Vec<u8>, unexpected: Vec<u8> },
}

/// Errors related to sensor operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("I2C communication failed: {0}")]
    I2cError(String),

    #[error("Sensor initialization failed: {0}")]
    InitializationError(String),

    #[error("unexpected model id 0x{found:04X} at 0x{address:02X}")]
    WrongModel { address: u8, found: u16 },

    #[error("no sensor variant for slot {0}")]
    NoVariant(usize),

    #[error("no measurement ready yet")]
    NotReady,
}

/// Errors related to the ranging loop
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangingError {
    #[error("ranging is disabled; distances are unavailable")]
    IllegalState,

    #[error("polling period {0} ms outside 20..=2000 ms")]
    InvalidRate(u64),
}

/// Errors related to application configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to serialise config: {0}")]
    SerializeError(String),
}

/// Errors related to service/daemon operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service initialization failed: {0}")]
    InitializationError(String),

    #[error("Signal handling error: {0}")]
    SignalError(String),
}

/// Application-level errors that can wrap other error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Device table error: {0}")]
    Table(#[from] TableError),

    #[error("Configuration run error: {0}")]
    Configure(#[from] ConfigureError),

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Ranging error: {0}")]
    Ranging(#[from] RangingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Convenience type alias for Results using AppError
pub type Result<T> = std::result::Result<T, AppError>;
