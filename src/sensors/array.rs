//! Live driver handles for the whole board.

use super::{Distance, RangingSensor, SensorFactory};
use crate::device::{DEVICE_COUNT, DeviceTable};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default calibration offset subtracted from every raw reading.
pub const DEFAULT_OFFSET_MM: u16 = 50;

/// One handle per fitted slot, bound at the slot's target address.
///
/// A slot whose handle could not be opened stays empty for the life of the
/// array and always reads as [`Distance::OUT_OF_RANGE`].
pub struct SensorArray {
    table: Arc<DeviceTable>,
    handles: [Option<Box<dyn RangingSensor>>; DEVICE_COUNT],
    offset_mm: u16,
    ranging: bool,
}

impl SensorArray {
    /// Open a handle for every fitted slot. Failures are logged and leave the
    /// slot empty.
    pub fn bind<F: SensorFactory>(table: Arc<DeviceTable>, factory: &mut F, offset_mm: u16) -> Self {
        let handles = std::array::from_fn(|index| {
            let device = &table.all()[index];
            if !device.is_active() {
                return None;
            }
            match factory.open(device) {
                Ok(handle) => {
                    debug!("sensor {} created at 0x{:02X}", device.label(), device.target_address);
                    Some(handle)
                }
                Err(e) => {
                    warn!("sensor {} unavailable: {}", device.label(), e);
                    None
                }
            }
        });
        let array = Self::from_handles(table, handles, offset_mm);
        info!("{} of {} sensors bound", array.bound_count(), array.table.active().count());
        array
    }

    /// Build from handles opened elsewhere. Handles in empty slots are dropped.
    pub fn from_handles(
        table: Arc<DeviceTable>,
        mut handles: [Option<Box<dyn RangingSensor>>; DEVICE_COUNT],
        offset_mm: u16,
    ) -> Self {
        for device in table.all().iter().filter(|d| !d.is_active()) {
            handles[device.index] = None;
        }
        Self {
            table,
            handles,
            offset_mm,
            ranging: false,
        }
    }

    pub fn table(&self) -> &Arc<DeviceTable> {
        &self.table
    }

    pub fn is_ranging(&self) -> bool {
        self.ranging
    }

    pub fn has_handle(&self, index: usize) -> bool {
        self.handles.get(index).is_some_and(Option::is_some)
    }

    pub fn bound_count(&self) -> usize {
        self.handles.iter().flatten().count()
    }

    pub fn start_ranging(&mut self) {
        if self.ranging {
            warn!("already ranging");
            return;
        }
        info!("starting ranging");
        for (device, handle) in self.table.all().iter().zip(self.handles.iter_mut()) {
            if let Some(sensor) = handle {
                match sensor.start() {
                    Ok(()) => debug!("sensor {} ranging started", device.label()),
                    Err(e) => error!("failed to start sensor {}: {}", device.label(), e),
                }
            }
        }
        self.ranging = true;
    }

    pub fn stop_ranging(&mut self) {
        if !self.ranging {
            warn!("not currently ranging");
            return;
        }
        info!("stopping ranging");
        for (device, handle) in self.table.all().iter().zip(self.handles.iter_mut()) {
            if let Some(sensor) = handle {
                match sensor.stop() {
                    Ok(()) => debug!("sensor {} ranging stopped", device.label()),
                    Err(e) => error!("failed to stop sensor {}: {}", device.label(), e),
                }
            }
        }
        self.ranging = false;
    }

    /// Offset-corrected distance for one slot, or the sentinel.
    pub fn read_one(&mut self, index: usize) -> Distance {
        let Some(Some(sensor)) = self.handles.get_mut(index) else {
            return Distance::OUT_OF_RANGE;
        };
        match sensor.read_mm() {
            Ok(raw) => Distance::corrected(raw, self.offset_mm),
            Err(e) => {
                warn!("reading sensor {}: {}", self.table.all()[index].label(), e);
                Distance::OUT_OF_RANGE
            }
        }
    }

    /// One reading per slot in table order.
    pub fn read_all(&mut self) -> [Distance; DEVICE_COUNT] {
        std::array::from_fn(|index| self.read_one(index))
    }

    pub fn close(&mut self) {
        if self.ranging {
            self.stop_ranging();
        }
        debug!("sensor array closed");
    }
}

impl Drop for SensorArray {
    fn drop(&mut self) {
        self.close();
    }
}
