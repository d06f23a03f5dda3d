//! Bus presence detection.

use embedded_hal::i2c::I2c;
use std::collections::BTreeSet;
use std::fmt;

/// First and last 7-bit address scanned, skipping the reserved ranges.
pub const SCAN_FIRST: u8 = 0x08;
pub const SCAN_LAST: u8 = 0x77;

/// Reports which addresses currently answer on the bus.
pub trait BusScanner {
    /// Scan the bus and remember the result.
    fn scan(&mut self) -> BusSnapshot;

    /// Whether `address` answered in the most recent scan.
    fn has_address(&self, address: u8) -> bool;
}

/// Set of addresses that acknowledged one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusSnapshot(BTreeSet<u8>);

impl BusSnapshot {
    pub fn contains(&self, address: u8) -> bool {
        self.0.contains(&address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u8> for BusSnapshot {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// i2cdetect-style grid.
impl fmt::Display for BusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    ")?;
        for col in 0..16 {
            write!(f, " {:x} ", col)?;
        }
        for row in (0u8..0x80).step_by(16) {
            write!(f, "\n{:02x}: ", row)?;
            for col in 0..16u8 {
                let address = row + col;
                if !(SCAN_FIRST..=SCAN_LAST).contains(&address) {
                    write!(f, "   ")?;
                } else if self.contains(address) {
                    write!(f, "{:02x} ", address)?;
                } else {
                    write!(f, "-- ")?;
                }
            }
        }
        Ok(())
    }
}

/// Scanner that tries a one-byte read at each address.
pub struct I2cScanner<I2C> {
    i2c: I2C,
    last: BusSnapshot,
}

impl<I2C: I2c> I2cScanner<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            last: BusSnapshot::default(),
        }
    }
}

impl<I2C: I2c> BusScanner for I2cScanner<I2C> {
    fn scan(&mut self) -> BusSnapshot {
        let mut buf = [0u8; 1];
        let found: BusSnapshot = (SCAN_FIRST..=SCAN_LAST)
            .filter(|&address| self.i2c.read(address, &mut buf).is_ok())
            .collect();
        tracing::trace!(count = found.len(), "bus scan complete");
        self.last = found.clone();
        found
    }

    fn has_address(&self, address: u8) -> bool {
        self.last.contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::sim::SimBus;
    use crate::device::Variant;

    #[test]
    fn test_scan_finds_powered_sensors_only() {
        let sim = SimBus::new(&[Variant::LongRange, Variant::LongRange]);
        sim.power(1, true);
        sim.add_other(0x49);
        let mut scanner = I2cScanner::new(sim);

        let snapshot = scanner.scan();
        assert_eq!(snapshot.addresses().collect::<Vec<_>>(), vec![0x29, 0x49]);
        assert!(scanner.has_address(0x29));
        assert!(!scanner.has_address(0x30));
    }

    #[test]
    fn test_has_address_reflects_latest_scan() {
        let sim = SimBus::new(&[Variant::ShortRange]);
        let mut scanner = I2cScanner::new(sim.clone());
        scanner.scan();
        assert!(!scanner.has_address(0x29));

        sim.power(0, true);
        assert!(!scanner.has_address(0x29));
        scanner.scan();
        assert!(scanner.has_address(0x29));
    }

    #[test]
    fn test_grid_marks_present_addresses() {
        let snapshot: BusSnapshot = [0x29, 0x33].into_iter().collect();
        let grid = snapshot.to_string();
        let row_20 = grid.lines().find(|l| l.starts_with("20:")).unwrap();
        assert!(row_20.contains("29"));
        let row_30 = grid.lines().find(|l| l.starts_with("30:")).unwrap();
        assert!(row_30.contains("33"));
        assert!(!row_30.contains("30 "));
        assert_eq!(grid.lines().count(), 9);
    }
}
