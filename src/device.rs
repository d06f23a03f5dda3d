//! The fixed table of sensor slots on the board.
//!
//! Eight positions around the ring, each with a sensor variant, the bus
//! address it is assigned after configuration and the GPIO that drives its
//! shutdown line. The table is built once at startup and shared read-only.

use crate::error::TableError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of sensor slots on the board.
pub const DEVICE_COUNT: usize = 8;

/// Address every sensor answers on after power-up, before reprogramming.
pub const FACTORY_ADDRESS: u8 = 0x29;

/// First and last address of the block reserved for assigned sensors.
pub const ADDRESS_BLOCK_START: u8 = 0x30;
pub const ADDRESS_BLOCK_END: u8 = 0x37;

const LABELS: [&str; DEVICE_COUNT] = ["N0", "NE1", "E2", "SE3", "S4", "SW5", "W6", "NW7"];

/// LED pixel for each device position. The ring is wired counter-clockwise
/// starting at north.
const PIXELS: [usize; DEVICE_COUNT] = [0, 7, 6, 5, 4, 3, 2, 1];

/// Target address and XSHUT GPIO of each slot.
const WIRING: [(u8, u32); DEVICE_COUNT] = [
    (0x30, 3),
    (0x31, 35),
    (0x32, 2),
    (0x33, 36),
    (0x34, 1),
    (0x35, 37),
    (0x36, 0),
    (0x37, 43),
];

/// Sensor capability class fitted in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// VL53L0X, reliable to about a metre
    ShortRange,
    /// VL53L1X, reliable to about four metres
    LongRange,
    /// Empty slot
    None,
}

impl Variant {
    /// Largest distance worth displaying for this variant.
    pub fn max_range_mm(self) -> Option<u16> {
        match self {
            Variant::ShortRange => Some(1000),
            Variant::LongRange => Some(4000),
            Variant::None => None,
        }
    }

    /// Bytes written to the factory address to move the sensor to `new_address`.
    pub fn address_change_frame(self, new_address: u8) -> Option<Vec<u8>> {
        match self {
            // I2C_SLAVE_DEVICE_ADDRESS, 8-bit register index
            Variant::ShortRange => Some(vec![0x8A, new_address]),
            // I2C_SLAVE__DEVICE_ADDRESS, 16-bit register index 0x0001
            Variant::LongRange => Some(vec![0x00, 0x01, new_address]),
            Variant::None => None,
        }
    }

    pub fn is_present(self) -> bool {
        self != Variant::None
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::ShortRange => "VL53L0X",
            Variant::LongRange => "VL53L1X",
            Variant::None => "none",
        };
        f.write_str(name)
    }
}

/// One sensor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub index: usize,
    pub variant: Variant,
    pub target_address: u8,
    pub shutdown_pin: u32,
}

impl Device {
    pub const fn new(index: usize, variant: Variant, target_address: u8, shutdown_pin: u32) -> Self {
        Self {
            index,
            variant,
            target_address,
            shutdown_pin,
        }
    }

    /// Compass label of the slot, e.g. `SE3`.
    pub fn label(&self) -> &'static str {
        LABELS[self.index]
    }

    /// LED pixel that shows this slot's distance.
    pub fn pixel(&self) -> usize {
        PIXELS[self.index]
    }

    pub fn is_active(&self) -> bool {
        self.variant.is_present()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, 0x{:02X}, xshut {})",
            self.label(),
            self.variant,
            self.target_address,
            self.shutdown_pin
        )
    }
}

/// Immutable table of all eight slots, indexed by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTable {
    devices: [Device; DEVICE_COUNT],
}

impl DeviceTable {
    /// Validate and build a table. Slot `i` must hold the device with index `i`.
    pub fn new(devices: [Device; DEVICE_COUNT]) -> Result<Self, TableError> {
        for (slot, device) in devices.iter().enumerate() {
            if device.index != slot {
                return Err(TableError::IndexOutOfOrder {
                    slot,
                    index: device.index,
                });
            }
            if !(ADDRESS_BLOCK_START..=ADDRESS_BLOCK_END).contains(&device.target_address) {
                return Err(TableError::AddressOutOfBlock {
                    index: device.index,
                    address: device.target_address,
                });
            }
            if devices[..slot]
                .iter()
                .any(|other| other.target_address == device.target_address)
            {
                return Err(TableError::DuplicateAddress(device.target_address));
            }
        }
        Ok(Self { devices })
    }

    /// The radiozoa board as wired: eight VL53L1X sensors.
    pub fn radiozoa() -> Result<Self, TableError> {
        Self::with_variants([Variant::LongRange; DEVICE_COUNT])
    }

    /// Board wiring with the given sensor fitted in each slot.
    pub fn with_variants(variants: [Variant; DEVICE_COUNT]) -> Result<Self, TableError> {
        Self::new(std::array::from_fn(|index| {
            let (address, pin) = WIRING[index];
            Device::new(index, variants[index], address, pin)
        }))
    }

    pub fn all(&self) -> &[Device; DEVICE_COUNT] {
        &self.devices
    }

    /// Slots that have a sensor fitted, in index order.
    pub fn active(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.is_active())
    }

    pub fn by_index(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    /// Case-insensitive label lookup.
    pub fn by_label(&self, label: &str) -> Option<&Device> {
        let index = LABELS.iter().position(|l| l.eq_ignore_ascii_case(label))?;
        self.devices.get(index)
    }

    pub fn by_address(&self, address: u8) -> Option<&Device> {
        self.devices.iter().find(|d| d.target_address == address)
    }

    /// Target addresses of the fitted sensors.
    pub fn active_addresses(&self) -> Vec<u8> {
        self.active().map(|d| d.target_address).collect()
    }
}
