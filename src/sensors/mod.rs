use crate::device::Device;
use crate::error::SensorError;
use std::fmt;

pub mod array;
pub mod vl53;

pub use array::SensorArray;

/// One offset-corrected distance, or the out-of-range sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Distance(u16);

impl Distance {
    /// Reported for absent sensors and failed reads. Larger than any range
    /// a supported sensor can measure.
    pub const OUT_OF_RANGE: Distance = Distance(9999);

    pub fn from_mm(mm: u16) -> Self {
        Distance(mm.min(Self::OUT_OF_RANGE.0 - 1))
    }

    /// Subtract the calibration offset, flooring at zero.
    pub fn corrected(raw_mm: u16, offset_mm: u16) -> Self {
        Self::from_mm(raw_mm.saturating_sub(offset_mm))
    }

    pub fn is_valid(self) -> bool {
        self != Self::OUT_OF_RANGE
    }

    pub fn millimeters(self) -> Option<u16> {
        self.is_valid().then_some(self.0)
    }

    /// Raw value including the sentinel.
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// `0123 9999 0450 ...`
pub fn format_distances(distances: &[Distance]) -> String {
    distances
        .iter()
        .map(Distance::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-variant driver bound to one bus address.
#[cfg_attr(test, mockall::automock)]
pub trait RangingSensor: Send {
    fn start(&mut self) -> Result<(), SensorError>;
    fn stop(&mut self) -> Result<(), SensorError>;
    /// Latest raw distance in millimetres.
    fn read_mm(&mut self) -> Result<u16, SensorError>;
}

/// Opens driver handles for configured devices.
pub trait SensorFactory {
    fn open(&mut self, device: &Device) -> Result<Box<dyn RangingSensor>, SensorError>;
}
