//! Service layer tying configuration, the sensor array and the ranging loop together.
//!
//! This module provides the run logic used by the binary: build an address
//! configurator for the bus, bind the sensor array, then poll until asked to stop.

use crate::bus::{BusScanner, BusSnapshot, I2cScanner};
use crate::config::AppConfig;
use crate::configurator::AddressConfigurator;
use crate::device::DeviceTable;
use crate::error::{Result, ServiceError};
use crate::led::LedSink;
use crate::ranging::RangingLoop;
use crate::sensors::{SensorArray, SensorFactory};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::MutexDevice;
use futures_util::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Configurator whose bus and scanner are both devices on one shared bus
pub type SharedConfigurator<'a, I2C, P, D> =
    AddressConfigurator<MutexDevice<'a, I2C>, P, I2cScanner<MutexDevice<'a, I2C>>, D>;

/// Shared state for one board
pub struct RadiozoaService {
    config: Arc<AppConfig>,
    table: Arc<DeviceTable>,
}

impl RadiozoaService {
    /// Create a new service
    pub fn new(config: Arc<AppConfig>, table: Arc<DeviceTable>) -> Self {
        Self { config, table }
    }

    /// Create a service for the board described in `config`
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self> {
        let table = Arc::new(config.board.table()?);
        Ok(Self::new(config, table))
    }

    pub fn table(&self) -> &Arc<DeviceTable> {
        &self.table
    }

    /// Scan the bus once
    pub fn scan<I2C: I2c>(&self, bus: &Mutex<I2C>) -> BusSnapshot {
        I2cScanner::new(MutexDevice::new(bus)).scan()
    }

    /// Build an address configurator over `bus` using the configured timing
    pub fn configurator<'a, I2C, P, D>(
        &self,
        bus: &'a Mutex<I2C>,
        pins: impl IntoIterator<Item = (usize, P)>,
        delay: D,
    ) -> Result<SharedConfigurator<'a, I2C, P, D>>
    where
        I2C: I2c,
        P: OutputPin,
        D: DelayNs,
    {
        let configurator = AddressConfigurator::new(
            Arc::clone(&self.table),
            MutexDevice::new(bus),
            I2cScanner::new(MutexDevice::new(bus)),
            pins,
            delay,
            (&self.config.configurator).into(),
        )?;
        Ok(configurator)
    }

    /// Bind the sensor array, poll until `shutdown` resolves, then stop cleanly
    pub async fn run_ranging<F, S>(
        &self,
        factory: &mut F,
        led: Arc<dyn LedSink>,
        shutdown: S,
    ) -> Result<()>
    where
        F: SensorFactory,
        S: Future<Output = Result<()>>,
    {
        let ranging_config = &self.config.ranging;
        let array = Arc::new(Mutex::new(SensorArray::bind(
            Arc::clone(&self.table),
            factory,
            ranging_config.offset_mm,
        )));
        lock(&array).start_ranging();

        let mut ranging = RangingLoop::new(&array, led, ranging_config.over_range);
        ranging.set_period(Duration::from_millis(ranging_config.period_ms))?;
        if ranging_config.auto_start {
            ranging.enable();
        } else {
            info!("ranging loop left disabled");
        }

        let result = shutdown.await;

        info!("shutting down");
        ranging.shutdown().await;
        lock(&array).close();
        result
    }
}

fn lock(array: &Mutex<SensorArray>) -> std::sync::MutexGuard<'_, SensorArray> {
    array.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolve once SIGINT or SIGTERM arrives
pub async fn wait_for_shutdown() -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| ServiceError::SignalError(e.to_string()))?;
    match signals.next().await {
        Some(signal) => info!(signal, "received shutdown signal"),
        None => warn!("signal stream closed"),
    }
    signals.handle().close();
    Ok(())
}
