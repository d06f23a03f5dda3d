//! I2C bus access.
//!
//! The configurator, the scanner and every sensor handle talk over the same
//! physical bus. It lives in one `'static` mutex and each user holds an
//! `embedded_hal_bus::i2c::MutexDevice` onto it, so every transaction is
//! serialised.

pub mod scanner;
#[cfg(test)]
pub mod sim;

pub use scanner::{BusScanner, BusSnapshot, I2cScanner};
