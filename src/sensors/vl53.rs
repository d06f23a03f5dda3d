//! VL53L0X and VL53L1X handles.
//!
//! Long-range sensors are driven through `vl53l1x_uld`, short-range ones
//! through `vl53l0x`. Both drivers run the full vendor init sequence when a
//! handle is opened, so opening is slow and should happen once per run.

use super::{RangingSensor, SensorFactory};
use crate::device::{Device, Variant};
use crate::error::SensorError;
use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use embedded_hal_bus::i2c::MutexDevice;
use std::fmt::Debug;
use std::sync::Mutex;
use tracing::{debug, trace};
use vl53l0x::VL53L0x;
use vl53l1x_uld::{IOVoltage, RangeStatus, VL53L1X, comm};

/// Model id every VL53L1X reports.
const L1_SENSOR_ID: u16 = 0xEACC;

fn driver_error<E: Debug>(e: E) -> SensorError {
    SensorError::I2cError(format!("{:?}", e))
}

/// Presents an embedded-hal 1.0 bus through the register traits of `vl53l1x_uld`.
pub struct UldBus<I2C>(I2C);

impl<I2C: I2c> comm::Write for UldBus<I2C> {
    type Error = ErrorKind;

    fn write_registers(
        &mut self,
        address: u8,
        register: [u8; 2],
        bytes: &[u8],
    ) -> Result<(), Self::Error> {
        let mut frame = Vec::with_capacity(register.len() + bytes.len());
        frame.extend_from_slice(&register);
        frame.extend_from_slice(bytes);
        self.0.write(address, &frame).map_err(|e| e.kind())
    }
}

impl<I2C: I2c> comm::Read for UldBus<I2C> {
    type Error = ErrorKind;

    fn read_registers(
        &mut self,
        address: u8,
        register: [u8; 2],
        bytes: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.0
            .write_read(address, &register, bytes)
            .map_err(|e| e.kind())
    }
}

/// VL53L1X at its assigned address.
///
/// A poll that lands between measurements returns the previous reading.
pub struct LongRange<I2C: I2c> {
    dev: VL53L1X<UldBus<I2C>>,
    address: u8,
    last: Option<u16>,
}

impl<I2C: I2c> LongRange<I2C> {
    /// Check the model id and load the default configuration.
    pub fn new(i2c: I2C, address: u8) -> Result<Self, SensorError> {
        let mut dev = VL53L1X::new(UldBus(i2c), address);
        let id = dev.get_sensor_id().map_err(driver_error)?;
        if id != L1_SENSOR_ID {
            return Err(SensorError::WrongModel { address, found: id });
        }
        dev.init(IOVoltage::Volt2_8)
            .map_err(|e| SensorError::InitializationError(format!("{:?}", e)))?;
        Ok(Self {
            dev,
            address,
            last: None,
        })
    }
}

impl<I2C: I2c + Send> RangingSensor for LongRange<I2C> {
    fn start(&mut self) -> Result<(), SensorError> {
        self.dev.start_ranging().map_err(driver_error)
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        self.dev.stop_ranging().map_err(driver_error)
    }

    fn read_mm(&mut self) -> Result<u16, SensorError> {
        if !self.dev.is_data_ready().map_err(driver_error)? {
            return self.last.ok_or(SensorError::NotReady);
        }
        let result = self.dev.get_result().map_err(driver_error)?;
        self.dev.clear_interrupt().map_err(driver_error)?;
        if result.status != RangeStatus::Valid {
            trace!(address = self.address, status = ?result.status, "range status");
        }
        self.last = Some(result.distance_mm);
        Ok(result.distance_mm)
    }
}

/// VL53L0X at its assigned address, ranging back-to-back once started.
pub struct ShortRange<I2C: I2c> {
    dev: VL53L0x<I2C>,
}

impl<I2C: I2c> ShortRange<I2C> {
    /// Check the model id and run the data and static init.
    pub fn new(i2c: I2C, address: u8) -> Result<Self, SensorError> {
        match VL53L0x::with_address(i2c, address) {
            Ok(dev) => Ok(Self { dev }),
            Err(vl53l0x::Error::InvalidDevice(found)) => Err(SensorError::WrongModel {
                address,
                found: u16::from(found),
            }),
            Err(vl53l0x::Error::BusError(e)) => Err(driver_error(e)),
            Err(e) => Err(SensorError::InitializationError(format!("{:?}", e))),
        }
    }
}

impl<I2C: I2c + Send> RangingSensor for ShortRange<I2C> {
    fn start(&mut self) -> Result<(), SensorError> {
        self.dev.start_continuous(0).map_err(driver_error)
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        self.dev.stop_continuous().map_err(driver_error)
    }

    fn read_mm(&mut self) -> Result<u16, SensorError> {
        self.dev
            .read_range_continuous_millimeters_blocking()
            .map_err(driver_error)
    }
}

/// Opens handles on one shared bus.
pub struct Vl53Factory<T: 'static> {
    bus: &'static Mutex<T>,
}

impl<T: 'static> Vl53Factory<T> {
    pub fn new(bus: &'static Mutex<T>) -> Self {
        Self { bus }
    }
}

impl<T: I2c + Send + 'static> SensorFactory for Vl53Factory<T> {
    fn open(&mut self, device: &Device) -> Result<Box<dyn RangingSensor>, SensorError> {
        let i2c = MutexDevice::new(self.bus);
        let address = device.target_address;
        let sensor: Box<dyn RangingSensor> = match device.variant {
            Variant::LongRange => Box::new(LongRange::new(i2c, address)?),
            Variant::ShortRange => Box::new(ShortRange::new(i2c, address)?),
            Variant::None => return Err(SensorError::NoVariant(device.index)),
        };
        debug!("{} initialised at 0x{:02X}", device.variant, address);
        Ok(sensor)
    }
}
