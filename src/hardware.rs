//! Linux bus and GPIO adapters.

use crate::device::DeviceTable;
use crate::error::ServiceError;
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::{I2cdev, SysfsPin};
use std::sync::Mutex;
use tracing::{debug, warn};

pub use linux_embedded_hal::Delay;

/// Open the bus for the lifetime of the process.
///
/// Users wrap the returned mutex in `embedded_hal_bus::i2c::MutexDevice`.
pub fn open_bus(device: &str) -> Result<&'static Mutex<I2cdev>, ServiceError> {
    let i2c = I2cdev::new(device)
        .map_err(|e| ServiceError::InitializationError(format!("opening {}: {}", device, e)))?;
    debug!("I2C bus {} open", device);
    Ok(Box::leak(Box::new(Mutex::new(i2c))))
}

/// Export every fitted slot's shutdown line as an output, initially low.
///
/// Pins that cannot be exported are left out and logged; the configurator
/// refuses to build without them.
pub fn open_shutdown_pins(table: &DeviceTable) -> Vec<(usize, SysfsPin)> {
    table
        .active()
        .filter_map(|device| {
            let pin = SysfsPin::new(u64::from(device.shutdown_pin));
            match pin.export().and_then(|_| pin.set_direction(Direction::Low)) {
                Ok(()) => {
                    debug!(
                        "configured XSHUT pin {} for sensor {} as output",
                        device.shutdown_pin,
                        device.label()
                    );
                    Some((device.index, pin))
                }
                Err(e) => {
                    warn!(
                        "cannot export XSHUT pin {} for sensor {}: {}",
                        device.shutdown_pin,
                        device.label(),
                        e
                    );
                    None
                }
            }
        })
        .collect()
}
