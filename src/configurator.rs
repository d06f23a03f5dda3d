//! Sensor address assignment.
//!
//! Every sensor on the board powers up at the factory address, so they can
//! only be told apart by bringing them up one at a time. The configurator
//! holds every shutdown line low, then raises them in index order and moves
//! each sensor to its target address before the next one appears. A final
//! scan checks the result.
//!
//! Nothing here runs concurrently. Raising two shutdown lines at once puts
//! two sensors on the factory address and the next address write would move
//! both of them.

use crate::bus::{BusScanner, BusSnapshot};
use crate::device::{
    ADDRESS_BLOCK_END, ADDRESS_BLOCK_START, DEVICE_COUNT, Device, DeviceTable, FACTORY_ADDRESS,
};
use crate::error::{ConfigureError, fmt_addresses};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{Error as _, OutputPin};
use embedded_hal::i2c::{Error as _, I2c};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Delays and retry limits used during a configuration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureTiming {
    /// Pause after each shutdown line is pulled low
    pub shutdown_settle_ms: u32,
    /// Scans for the factory address before a sensor is given up on
    pub presence_attempts: u32,
    /// Pause before each of those scans
    pub presence_poll_ms: u32,
    /// Pause after an address write
    pub address_settle_ms: u32,
    /// Pause after finishing with one sensor
    pub device_settle_ms: u32,
    /// Pause before the verification scan
    pub rescan_delay_ms: u32,
    /// How long [`AddressConfigurator::reset`] holds a line low
    pub reset_hold_ms: u32,
}

impl Default for ConfigureTiming {
    fn default() -> Self {
        Self {
            shutdown_settle_ms: 50,
            presence_attempts: 5,
            presence_poll_ms: 750,
            address_settle_ms: 50,
            device_settle_ms: 250,
            rescan_delay_ms: 1000,
            reset_hold_ms: 250,
        }
    }
}

/// Outcome of one call to [`AddressConfigurator::configure`].
#[derive(Debug, Clone)]
pub struct ConfigureReport {
    pub forced: bool,
    /// Whether the shutdown and reprogram phases ran
    pub reprogrammed: bool,
    pub before: BusSnapshot,
    pub after: BusSnapshot,
    /// Devices that never appeared at the factory address
    pub absent: Vec<usize>,
    /// Address writes that failed, one per device
    pub write_failures: Vec<ConfigureError>,
    pub outcome: Result<(), ConfigureError>,
}

impl ConfigureReport {
    fn new(forced: bool, before: BusSnapshot) -> Self {
        Self {
            forced,
            reprogrammed: false,
            after: before.clone(),
            before,
            absent: Vec::new(),
            write_failures: Vec::new(),
            outcome: Ok(()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Target addresses missing from the final scan.
    pub fn missing(&self) -> &[u8] {
        match &self.outcome {
            Err(ConfigureError::VerificationMismatch { missing, .. }) => missing,
            _ => &[],
        }
    }

    /// Addresses present in the final scan that should not be.
    pub fn unexpected(&self) -> &[u8] {
        match &self.outcome {
            Err(ConfigureError::VerificationMismatch { unexpected, .. }) => unexpected,
            _ => &[],
        }
    }
}

/// Drives the shutdown lines and address writes for one bus.
pub struct AddressConfigurator<I2C, P, S, D> {
    table: Arc<DeviceTable>,
    i2c: I2C,
    scanner: S,
    pins: [Option<P>; DEVICE_COUNT],
    delay: D,
    timing: ConfigureTiming,
}

impl<I2C, P, S, D> AddressConfigurator<I2C, P, S, D>
where
    I2C: I2c,
    P: OutputPin,
    S: BusScanner,
    D: DelayNs,
{
    /// Build a configurator. Every fitted slot needs a shutdown pin; pins
    /// given for empty slots are dropped unused.
    pub fn new(
        table: Arc<DeviceTable>,
        i2c: I2C,
        scanner: S,
        pins: impl IntoIterator<Item = (usize, P)>,
        delay: D,
        timing: ConfigureTiming,
    ) -> Result<Self, ConfigureError> {
        let mut slots: [Option<P>; DEVICE_COUNT] = std::array::from_fn(|_| None);
        for (index, pin) in pins {
            if table.by_index(index).is_some_and(Device::is_active) {
                slots[index] = Some(pin);
            }
        }
        if let Some(device) = table.active().find(|d| slots[d.index].is_none()) {
            return Err(ConfigureError::PinUnavailable {
                index: device.index,
            });
        }

        Ok(Self {
            table,
            i2c,
            scanner,
            pins: slots,
            delay,
            timing,
        })
    }

    /// Assign every sensor its target address.
    ///
    /// Unless `force` is set, a bus that already shows every target address
    /// and no factory address is left alone. Failures are reported in the
    /// returned report; there is no rollback of sensors already moved.
    pub fn configure(&mut self, force: bool) -> ConfigureReport {
        info!(forced = force, "radiozoa sensor configuration");
        for device in self.table.all() {
            debug!("{}", device);
        }

        let before = self.scanner.scan();
        let mut report = ConfigureReport::new(force, before.clone());
        let current = self.verify(&before);

        if !force && current.is_ok() {
            info!("radiozoa already configured");
            return report;
        }
        if before.contains(FACTORY_ADDRESS) {
            warn!(
                "found default 0x{:02X} device; reassigning addresses",
                FACTORY_ADDRESS
            );
        }
        if let Err(ConfigureError::VerificationMismatch { missing, .. }) = &current {
            if !missing.is_empty() {
                warn!("missing sensor addresses: {}", fmt_addresses(missing));
            }
        }

        report.reprogrammed = true;
        if let Err(e) = self
            .shutdown_all()
            .and_then(|_| self.assign_addresses(&mut report))
        {
            error!("configuration aborted: {}", e);
            report.after = self.scanner.scan();
            report.outcome = Err(e);
            return report;
        }

        self.delay.delay_ms(self.timing.rescan_delay_ms);
        info!("re-scanning for sensor addresses");
        report.after = self.scanner.scan();
        report.outcome = self.verify(&report.after);

        match &report.outcome {
            Ok(()) => info!("sensor addresses configured successfully"),
            Err(e) => error!("{}", e),
        }
        report
    }

    /// Check a snapshot against the table.
    pub fn verify(&self, snapshot: &BusSnapshot) -> Result<(), ConfigureError> {
        let expected = self.table.active_addresses();
        let missing: Vec<u8> = expected
            .iter()
            .copied()
            .filter(|&a| !snapshot.contains(a))
            .collect();
        let unexpected: Vec<u8> = snapshot
            .addresses()
            .filter(|&a| {
                a == FACTORY_ADDRESS
                    || ((ADDRESS_BLOCK_START..=ADDRESS_BLOCK_END).contains(&a)
                        && !expected.contains(&a))
            })
            .collect();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(ConfigureError::VerificationMismatch {
                missing,
                unexpected,
            })
        }
    }

    /// Power-cycle one sensor.
    ///
    /// The sensor comes back at the factory address, so a forced
    /// configuration run is needed before it can range again.
    pub fn reset(&mut self, index: usize) -> Result<(), ConfigureError> {
        let table = Arc::clone(&self.table);
        let device = table
            .by_index(index)
            .filter(|d| d.is_active())
            .ok_or(ConfigureError::EmptySlot { index })?;

        info!(device = device.label(), pin = device.shutdown_pin, "resetting sensor");
        self.set_shutdown(index, false)?;
        self.delay.delay_ms(self.timing.reset_hold_ms);
        self.set_shutdown(index, true)?;
        warn!(
            "sensor {} is back at 0x{:02X}",
            device.label(),
            FACTORY_ADDRESS
        );
        Ok(())
    }

    fn shutdown_all(&mut self) -> Result<(), ConfigureError> {
        let table = Arc::clone(&self.table);
        for device in table.active() {
            debug!(device = device.label(), pin = device.shutdown_pin, "shutting down sensor");
            self.set_shutdown(device.index, false)?;
            self.delay.delay_ms(self.timing.shutdown_settle_ms);
        }
        info!("all sensors shut down");
        Ok(())
    }

    fn assign_addresses(&mut self, report: &mut ConfigureReport) -> Result<(), ConfigureError> {
        let table = Arc::clone(&self.table);
        for device in table.active() {
            info!(device = device.label(), pin = device.shutdown_pin, "configuring sensor");
            self.set_shutdown(device.index, true)?;

            if !self.wait_for_factory_address() {
                warn!(
                    "sensor {} did not appear at 0x{:02X}",
                    device.label(),
                    FACTORY_ADDRESS
                );
                report.absent.push(device.index);
                self.set_shutdown(device.index, false)?;
                continue;
            }

            match self.write_address(device) {
                Ok(()) => info!(
                    "set address for sensor {} to 0x{:02X}",
                    device.label(),
                    device.target_address
                ),
                Err(e) => {
                    error!("{}", e);
                    report.write_failures.push(e);
                    // still at the factory address, where the next sensor appears
                    self.set_shutdown(device.index, false)?;
                }
            }
            self.delay.delay_ms(self.timing.device_settle_ms);
        }
        Ok(())
    }

    fn wait_for_factory_address(&mut self) -> bool {
        for attempt in 0..self.timing.presence_attempts {
            self.delay.delay_ms(self.timing.presence_poll_ms);
            self.scanner.scan();
            if self.scanner.has_address(FACTORY_ADDRESS) {
                debug!(attempt, "sensor appeared at 0x{:02X}", FACTORY_ADDRESS);
                return true;
            }
            debug!(attempt, "waiting for sensor");
        }
        false
    }

    fn write_address(&mut self, device: &Device) -> Result<(), ConfigureError> {
        let Some(frame) = device.variant.address_change_frame(device.target_address) else {
            return Ok(());
        };
        self.i2c
            .write(FACTORY_ADDRESS, &frame)
            .map_err(|e| ConfigureError::BusWriteFailure {
                index: device.index,
                address: device.target_address,
                message: format!("{:?}", e.kind()),
            })?;
        self.delay.delay_ms(self.timing.address_settle_ms);
        Ok(())
    }

    fn set_shutdown(&mut self, index: usize, enabled: bool) -> Result<(), ConfigureError> {
        let pin = self.pins[index]
            .as_mut()
            .ok_or(ConfigureError::PinUnavailable { index })?;
        let result = if enabled { pin.set_high() } else { pin.set_low() };
        result.map_err(|e| ConfigureError::PinWrite {
            index,
            message: format!("{:?}", e.kind()),
        })
    }
}
