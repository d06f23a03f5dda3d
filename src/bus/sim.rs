//! Simulated sensor bus for tests.
//!
//! Models the behaviour that makes the board awkward: every sensor comes up
//! at the factory address when its shutdown line goes high and forgets its
//! assigned address when powered down. Sensors sharing an address all
//! acknowledge, and a write reaches every one of them.

use crate::device::{FACTORY_ADDRESS, Variant};
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation, SevenBitAddress};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

struct SimSensor {
    variant: Variant,
    address: u8,
    powered: bool,
    responsive: bool,
    failing_reads: bool,
    failing_writes: bool,
    ranging: bool,
    register: u16,
    distance_mm: u16,
}

#[derive(Default)]
struct SimState {
    sensors: Vec<SimSensor>,
    others: BTreeSet<u8>,
    toggles: Vec<usize>,
    failing_pins: BTreeSet<usize>,
    address_writes: usize,
    collisions: usize,
}

#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// One simulated sensor per entry, all powered down.
    pub fn new(variants: &[Variant]) -> Self {
        let toggles = vec![0; variants.len()];
        let sensors = variants
            .iter()
            .map(|&variant| SimSensor {
                variant,
                address: FACTORY_ADDRESS,
                powered: false,
                responsive: variant.is_present(),
                failing_reads: false,
                failing_writes: false,
                ranging: false,
                register: 0,
                distance_mm: 0,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(SimState {
                sensors,
                toggles,
                ..Default::default()
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn power(&self, index: usize, on: bool) {
        self.with(|s| {
            let sensor = &mut s.sensors[index];
            if on && !sensor.powered {
                sensor.address = FACTORY_ADDRESS;
                sensor.ranging = false;
            }
            sensor.powered = on;
        });
    }

    /// Power every sensor and place it at `0x30 + index`, as a previous run would.
    pub fn preconfigure(&self) {
        self.with(|s| {
            for (i, sensor) in s.sensors.iter_mut().enumerate() {
                sensor.powered = true;
                sensor.address = 0x30 + i as u8;
            }
        });
    }

    /// The sensor never acknowledges anything.
    pub fn set_unresponsive(&self, index: usize) {
        self.with(|s| s.sensors[index].responsive = false);
    }

    /// The sensor acknowledges its address but reads fail.
    pub fn set_failing_reads(&self, index: usize) {
        self.with(|s| s.sensors[index].failing_reads = true);
    }

    /// The sensor acknowledges its address but rejects every write.
    pub fn set_failing_writes(&self, index: usize) {
        self.with(|s| s.sensors[index].failing_writes = true);
    }

    pub fn set_distance(&self, index: usize, mm: u16) {
        self.with(|s| s.sensors[index].distance_mm = mm);
    }

    /// Another device on the bus that answers every read.
    pub fn add_other(&self, address: u8) {
        self.with(|s| s.others.insert(address));
    }

    /// The shutdown line of this slot cannot be driven.
    pub fn set_failing_pin(&self, index: usize) {
        self.with(|s| s.failing_pins.insert(index));
    }

    /// A `'static` mutex over a clone of this bus, as the binary shares the
    /// real one.
    pub fn shared(&self) -> &'static Mutex<SimBus> {
        Box::leak(Box::new(Mutex::new(self.clone())))
    }

    pub fn pin(&self, index: usize) -> SimPin {
        SimPin {
            index,
            bus: self.clone(),
        }
    }

    pub fn pin_toggles(&self) -> usize {
        self.with(|s| s.toggles.iter().sum())
    }

    pub fn pin_toggles_for(&self, index: usize) -> usize {
        self.with(|s| s.toggles[index])
    }

    pub fn address_writes(&self) -> usize {
        self.with(|s| s.address_writes)
    }

    /// Writes that reached more than one sensor.
    pub fn collisions(&self) -> usize {
        self.with(|s| s.collisions)
    }

    pub fn is_ranging(&self, index: usize) -> bool {
        self.with(|s| s.sensors[index].ranging)
    }

    pub fn is_powered(&self, index: usize) -> bool {
        self.with(|s| s.sensors[index].powered)
    }

    pub fn address_of(&self, index: usize) -> u8 {
        self.with(|s| s.sensors[index].address)
    }
}

impl SimSensor {
    fn write(&mut self, bytes: &[u8], address_writes: &mut usize) -> Result<(), ErrorKind> {
        if self.failing_writes {
            return Err(ErrorKind::Other);
        }
        match (self.variant, bytes) {
            (Variant::ShortRange, [0x8A, new]) | (Variant::LongRange, [0x00, 0x01, new]) => {
                self.address = *new & 0x7F;
                *address_writes += 1;
            }
            (Variant::ShortRange, [reg, data @ ..]) => {
                self.register = u16::from(*reg);
                match (*reg, data) {
                    (0x00, [0x02]) => self.ranging = true,
                    (0x00, [0x01]) => self.ranging = false,
                    _ => {}
                }
            }
            (Variant::LongRange, [hi, lo, data @ ..]) => {
                self.register = u16::from_be_bytes([*hi, *lo]);
                match (self.register, data) {
                    (0x0087, [0x40]) => self.ranging = true,
                    (0x0087, [0x00]) => self.ranging = false,
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Register file as seen by the drivers. Reads auto-increment.
    fn register_byte(&self, register: u16) -> u8 {
        let [hi, lo] = self.distance_mm.to_be_bytes();
        match (self.variant, register) {
            // model id
            (Variant::ShortRange, 0xC0) => 0xEE,
            (Variant::ShortRange, 0x1E) => hi,
            (Variant::ShortRange, 0x1F) => lo,
            // GPIO__TIO_HV_STATUS: data always ready
            (Variant::LongRange, 0x0031) => 0x01,
            // RESULT__RANGE_STATUS: valid
            (Variant::LongRange, 0x0089) => 0x09,
            (Variant::LongRange, 0x0096) => hi,
            (Variant::LongRange, 0x0097) => lo,
            (Variant::LongRange, 0x010F) => 0xEA,
            (Variant::LongRange, 0x0110) => 0xCC,
            _ => 0,
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        if self.failing_reads {
            return Err(ErrorKind::Other);
        }
        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = self.register_byte(self.register.wrapping_add(offset as u16));
        }
        Ok(())
    }
}

impl i2c::ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let responders: Vec<usize> = state
            .sensors
            .iter()
            .enumerate()
            .filter(|(_, s)| s.powered && s.responsive && s.address == address)
            .map(|(i, _)| i)
            .collect();

        if responders.is_empty() {
            return if state.others.contains(&address) {
                Ok(())
            } else {
                Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
            };
        }
        let writes = operations
            .iter()
            .any(|op| matches!(op, Operation::Write(_)));
        if writes && responders.len() > 1 {
            state.collisions += 1;
        }
        for index in responders {
            let sensor = &mut state.sensors[index];
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(bytes) => sensor.write(bytes, &mut state.address_writes)?,
                    Operation::Read(buf) => sensor.read(buf)?,
                }
            }
        }
        Ok(())
    }
}

/// Shutdown line of one simulated sensor.
pub struct SimPin {
    index: usize,
    bus: SimBus,
}

impl digital::ErrorType for SimPin {
    type Error = digital::ErrorKind;
}

impl SimPin {
    fn drive(&mut self, high: bool) -> Result<(), digital::ErrorKind> {
        if self.bus.with(|s| s.failing_pins.contains(&self.index)) {
            return Err(digital::ErrorKind::Other);
        }
        self.bus.with(|s| s.toggles[self.index] += 1);
        self.bus.power(self.index, high);
        Ok(())
    }
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}
