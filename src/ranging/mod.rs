//! Periodic polling of the sensor array.
//!
//! A single task reads every sensor, maps each distance to a colour and
//! pushes it to the LED sink, then sleeps until the next period boundary.
//! Cancellation is only observed between iterations, so a bus transaction
//! is never cut short.

use crate::device::{DEVICE_COUNT, DeviceTable};
use crate::error::RangingError;
use crate::led::LedSink;
use crate::sensors::{Distance, SensorArray, format_distances};
use color::{OverRange, color_for_distance};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod color;

pub const MIN_PERIOD_MS: u64 = 20;
pub const MAX_PERIOD_MS: u64 = 2000;
pub const DEFAULT_PERIOD_MS: u64 = 50;

/// Reject periods outside 20..=2000 ms (50 Hz down to 0.5 Hz).
pub fn validate_period(period_ms: u64) -> Result<u64, RangingError> {
    if (MIN_PERIOD_MS..=MAX_PERIOD_MS).contains(&period_ms) {
        Ok(period_ms)
    } else {
        Err(RangingError::InvalidRate(period_ms))
    }
}

struct Shared {
    enabled: AtomicBool,
    period_ms: AtomicU64,
    running: AtomicUsize,
    iterations: AtomicU64,
    distances: Mutex<[Distance; DEVICE_COUNT]>,
}

/// Keeps the live-task count honest even if the task is dropped mid-await.
struct RunningGuard(Arc<Shared>);

impl RunningGuard {
    fn new(shared: Arc<Shared>) -> Self {
        shared.running.fetch_add(1, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Enable/disable control over the polling task.
pub struct RangingLoop {
    array: Weak<Mutex<SensorArray>>,
    led: Arc<dyn LedSink>,
    table: Arc<DeviceTable>,
    over_range: OverRange,
    shared: Arc<Shared>,
    task: Option<(CancellationToken, JoinHandle<()>)>,
}

impl RangingLoop {
    /// The loop only holds a weak reference to the array; once the array is
    /// dropped the loop disables itself.
    pub fn new(array: &Arc<Mutex<SensorArray>>, led: Arc<dyn LedSink>, over_range: OverRange) -> Self {
        let table = Arc::clone(array.lock().unwrap_or_else(PoisonError::into_inner).table());
        Self {
            array: Arc::downgrade(array),
            led,
            table,
            over_range,
            shared: Arc::new(Shared {
                enabled: AtomicBool::new(false),
                period_ms: AtomicU64::new(DEFAULT_PERIOD_MS),
                running: AtomicUsize::new(0),
                iterations: AtomicU64::new(0),
                distances: Mutex::new([Distance::OUT_OF_RANGE; DEVICE_COUNT]),
            }),
            task: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.shared.period_ms.load(Ordering::SeqCst))
    }

    /// Change the polling period; takes effect from the next iteration.
    pub fn set_period(&self, period: Duration) -> Result<(), RangingError> {
        let ms = validate_period(period.as_millis().try_into().unwrap_or(u64::MAX))?;
        self.shared.period_ms.store(ms, Ordering::SeqCst);
        info!(period_ms = ms, "ranging period set");
        Ok(())
    }

    /// Change the polling rate in Hz, 0.5 to 50.
    pub fn set_rate_hz(&self, hz: f64) -> Result<(), RangingError> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(RangingError::InvalidRate(0));
        }
        let ms = (1000.0 / hz).round() as u64;
        self.set_period(Duration::from_millis(ms))
    }

    /// Number of completed polling iterations since construction.
    pub fn iterations(&self) -> u64 {
        self.shared.iterations.load(Ordering::SeqCst)
    }

    /// Number of polling tasks currently alive.
    pub fn running_tasks(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Most recent batch of readings. Only available while enabled.
    pub fn distances(&self) -> Result<[Distance; DEVICE_COUNT], RangingError> {
        if !self.is_enabled() {
            return Err(RangingError::IllegalState);
        }
        Ok(*self
            .shared
            .distances
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    /// Start the polling task. Must be called from within a tokio runtime.
    pub fn enable(&mut self) {
        if self.is_enabled() {
            warn!("ranging already enabled");
            return;
        }
        self.shared.enabled.store(true, Ordering::SeqCst);
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.array.clone(),
            Arc::clone(&self.led),
            Arc::clone(&self.table),
            self.over_range,
            Arc::clone(&self.shared),
            token.clone(),
        ));
        self.task = Some((token, handle));
        info!(period_ms = self.period().as_millis() as u64, "ranging enabled");
    }

    /// Request the polling task to stop. Returns without waiting for the
    /// in-flight iteration to finish.
    pub fn disable(&mut self) {
        let task = self.task.take();
        if !self.shared.enabled.swap(false, Ordering::SeqCst) {
            warn!("ranging already disabled");
        } else {
            info!("ranging disabled");
        }
        if let Some((token, _handle)) = task {
            token.cancel();
        }
    }

    /// Disable and wait for the polling task to exit.
    pub async fn shutdown(&mut self) {
        let task = self.task.take();
        self.shared.enabled.store(false, Ordering::SeqCst);
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("ranging task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RangingLoop {
    fn drop(&mut self) {
        if let Some((token, _)) = self.task.take() {
            token.cancel();
        }
    }
}

async fn poll_loop(
    array: Weak<Mutex<SensorArray>>,
    led: Arc<dyn LedSink>,
    table: Arc<DeviceTable>,
    over_range: OverRange,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    let _running = RunningGuard::new(Arc::clone(&shared));
    let mut next = Instant::now();

    while !token.is_cancelled() {
        let Some(sensors) = array.upgrade() else {
            warn!("no sensor array: disabling ranging");
            shared.enabled.store(false, Ordering::SeqCst);
            token.cancel();
            break;
        };
        let distances = sensors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read_all();
        drop(sensors);

        *shared
            .distances
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = distances;
        debug!("distances: {}", format_distances(&distances));

        for device in table.active() {
            let Some(max_mm) = device.variant.max_range_mm() else {
                continue;
            };
            let color = color_for_distance(distances[device.index], max_mm, over_range);
            if let Err(e) = led.set_color(device.pixel(), color).await {
                warn!("failed to set pixel {}: {}", device.pixel(), e);
            }
        }
        shared.iterations.fetch_add(1, Ordering::SeqCst);

        next += Duration::from_millis(shared.period_ms.load(Ordering::SeqCst));
        let now = Instant::now();
        if next < now {
            next = now;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(next) => {}
        }
    }
    debug!("ranging loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Variant;
    use crate::led::{MockLedSink, NoOpLed};
    use crate::ranging::color::Rgb;
    use crate::sensors::{MockRangingSensor, RangingSensor};
    use async_trait::async_trait;

    /// Remembers the last colour sent to each pixel.
    #[derive(Default)]
    struct RecordingLed(Mutex<Vec<(usize, Rgb)>>);

    #[async_trait]
    impl LedSink for RecordingLed {
        async fn set_color(&self, pixel: usize, color: Rgb) -> crate::error::Result<()> {
            self.0.lock().unwrap().push((pixel, color));
            Ok(())
        }
    }

    impl RecordingLed {
        fn last_for(&self, pixel: usize) -> Option<Rgb> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(p, _)| *p == pixel)
                .map(|(_, c)| *c)
        }
    }

    fn array_with(table: DeviceTable, readings: &[(usize, u16)]) -> Arc<Mutex<SensorArray>> {
        let mut handles: [Option<Box<dyn RangingSensor>>; DEVICE_COUNT] = Default::default();
        for &(index, mm) in readings {
            let mut mock = MockRangingSensor::new();
            mock.expect_read_mm().returning(move || Ok(mm));
            handles[index] = Some(Box::new(mock));
        }
        Arc::new(Mutex::new(SensorArray::from_handles(Arc::new(table), handles, 50)))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    #[tokio::test]
    async fn test_distances_rejected_while_disabled() {
        let array = array_with(DeviceTable::radiozoa().unwrap(), &[(0, 500)]);
        let mut ranging = RangingLoop::new(&array, Arc::new(NoOpLed), OverRange::Fold);
        assert_eq!(ranging.distances(), Err(RangingError::IllegalState));

        ranging.set_period(Duration::from_millis(20)).unwrap();
        ranging.enable();
        settle().await;
        assert_eq!(ranging.distances().unwrap()[0], Distance::from_mm(450));

        ranging.disable();
        assert_eq!(ranging.distances(), Err(RangingError::IllegalState));
    }

    #[tokio::test]
    async fn test_colors_pushed_to_mapped_pixels() {
        let mut variants = [Variant::LongRange; DEVICE_COUNT];
        variants[1] = Variant::ShortRange;
        let table = DeviceTable::with_variants(variants).unwrap();
        let pixel_0 = table.all()[0].pixel();
        let pixel_1 = table.all()[1].pixel();
        let pixel_2 = table.all()[2].pixel();
        let array = array_with(table, &[(0, 4200), (1, 75)]);
        let led = Arc::new(RecordingLed::default());
        let mut ranging = RangingLoop::new(&array, led.clone(), OverRange::Fold);

        ranging.set_period(Duration::from_millis(20)).unwrap();
        ranging.enable();
        settle().await;
        ranging.shutdown().await;

        // 4150 mm folds to the long-range maximum
        assert_eq!(led.last_for(pixel_0), Some(Rgb::new(255, 0, 255)));
        // 75 mm raw, 25 mm corrected
        assert_eq!(led.last_for(pixel_1), Some(Rgb::RED));
        // no handle
        assert_eq!(led.last_for(pixel_2), Some(Rgb::BLACK));
    }

    #[tokio::test]
    async fn test_empty_slot_not_pushed() {
        let mut variants = [Variant::LongRange; DEVICE_COUNT];
        variants[4] = Variant::None;
        let table = DeviceTable::with_variants(variants).unwrap();
        let empty_pixel = table.all()[4].pixel();
        let array = array_with(table, &[]);
        let mut led = MockLedSink::new();
        led.expect_set_color()
            .withf(move |pixel, _| *pixel != empty_pixel)
            .returning(|_, _| Ok(()));
        let mut ranging = RangingLoop::new(&array, Arc::new(led), OverRange::Fold);

        ranging.enable();
        settle().await;
        ranging.shutdown().await;
        assert!(ranging.iterations() >= 1);
    }

    #[tokio::test]
    async fn test_reenable_runs_exactly_one_task() {
        let array = array_with(DeviceTable::radiozoa().unwrap(), &[(0, 300)]);
        let mut ranging = RangingLoop::new(&array, Arc::new(NoOpLed), OverRange::Fold);
        ranging.set_period(Duration::from_millis(20)).unwrap();

        ranging.enable();
        ranging.enable();
        settle().await;
        assert_eq!(ranging.running_tasks(), 1);

        ranging.disable();
        ranging.enable();
        settle().await;
        assert!(ranging.is_enabled());
        assert_eq!(ranging.running_tasks(), 1);

        ranging.disable();
        ranging.disable();
        settle().await;
        assert_eq!(ranging.running_tasks(), 0);
    }

    #[tokio::test]
    async fn test_loop_disables_itself_when_array_dropped() {
        let array = array_with(DeviceTable::radiozoa().unwrap(), &[(0, 300)]);
        let mut ranging = RangingLoop::new(&array, Arc::new(NoOpLed), OverRange::Fold);
        ranging.set_period(Duration::from_millis(20)).unwrap();
        ranging.enable();
        settle().await;

        drop(array);
        settle().await;

        assert!(!ranging.is_enabled());
        assert_eq!(ranging.running_tasks(), 0);
        assert_eq!(ranging.distances(), Err(RangingError::IllegalState));
    }

    #[test]
    fn test_period_bounds() {
        let array = array_with(DeviceTable::radiozoa().unwrap(), &[]);
        let ranging = RangingLoop::new(&array, Arc::new(NoOpLed), OverRange::Fold);
        assert_eq!(ranging.period(), Duration::from_millis(DEFAULT_PERIOD_MS));

        assert!(ranging.set_period(Duration::from_millis(20)).is_ok());
        assert!(ranging.set_period(Duration::from_millis(2000)).is_ok());
        assert_eq!(
            ranging.set_period(Duration::from_millis(19)),
            Err(RangingError::InvalidRate(19))
        );
        assert_eq!(
            ranging.set_period(Duration::from_millis(2001)),
            Err(RangingError::InvalidRate(2001))
        );
        assert_eq!(ranging.period(), Duration::from_millis(2000));

        assert!(ranging.set_rate_hz(20.0).is_ok());
        assert_eq!(ranging.period(), Duration::from_millis(50));
        assert!(ranging.set_rate_hz(0.5).is_ok());
        assert_eq!(ranging.period(), Duration::from_millis(2000));
        assert!(ranging.set_rate_hz(100.0).is_err());
        assert!(ranging.set_rate_hz(0.0).is_err());
    }
}
