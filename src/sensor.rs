mod backlight;
mod cpu;
mod memory;
mod power;
mod sysfs;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

pub use self::{
    backlight::{Backlight, BacklightSensor, MAX_LEVEL},
    cpu::{CpuFrequencySensor, CpuLoadSensor, CpuTimes, loadavg_fraction, read_loadavg},
    memory::{FnSensor, MemorySensor},
    power::{HeuristicPowerEstimator, PowerEstimator, PowerSensor},
    sysfs::{
        ChargingStatus, FileSensor, POWER_SUPPLY_ROOT, detect_battery_path, read_capacity_mwh,
        read_charging_status,
    },
};
use crate::{
    clock::{Clock, SystemClock},
    point::Point,
    sync::lock,
};

/// Minimum time between two reads of the same sensor.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("{0} is not available on this device")]
    Unavailable(String),

    #[error("couldn't read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("couldn't parse {name} value {value:?}")]
    Parse { name: String, value: String },
}

/// A source of raw numeric readings.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the backing data source exists at all.
    fn is_supported(&self) -> bool {
        true
    }

    fn measure(&self) -> Result<f64, SensorError>;
}

impl<S: Sensor + ?Sized> Sensor for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_supported(&self) -> bool {
        (**self).is_supported()
    }

    fn measure(&self) -> Result<f64, SensorError> {
        (**self).measure()
    }
}

/// Turns a [`Sensor`] into timestamped points, bounding how often the
/// underlying source is read.
pub struct SensorReader {
    sensor: Arc<dyn Sensor>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    last: Mutex<Option<(Instant, Point)>>,
    reported_unsupported: AtomicBool,
}

impl SensorReader {
    pub fn new(sensor: Arc<dyn Sensor>) -> Self {
        Self {
            sensor,
            clock: Arc::new(SystemClock),
            debounce: DEFAULT_DEBOUNCE,
            last: Mutex::new(None),
            reported_unsupported: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn sensor(&self) -> &Arc<dyn Sensor> {
        &self.sensor
    }

    pub fn is_supported(&self) -> bool {
        self.sensor.is_supported()
    }

    /// Read the sensor's raw value, bypassing the debounce.
    pub fn measure(&self) -> Result<f64, SensorError> {
        self.sensor.measure()
    }

    /// Take a timestamped reading.
    ///
    /// Calls within the debounce interval of the previous read return the
    /// cached point. A failed or non-finite read yields the last good value
    /// (or zero) so the caller still gets a sample. Unsupported sensors yield nothing.
    pub fn measure_point(&self) -> Option<Point> {
        if !self.sensor.is_supported() {
            if !self.reported_unsupported.swap(true, Ordering::Relaxed) {
                log::info!("{} sensor is not supported, no samples will be taken", self.sensor.name());
            }
            return None;
        }

        let now = self.clock.now();
        let mut last = lock(&self.last);

        if let Some((taken_at, point)) = *last
            && now.saturating_duration_since(taken_at) < self.debounce
        {
            return Some(point);
        }

        let placeholder = last.map_or(0.0, |(_, point)| point.y);
        let value = match self.sensor.measure() {
            Ok(value) if value.is_finite() => value,
            Ok(value) => {
                log::debug!("{} read {value}, using placeholder reading", self.sensor.name());
                placeholder
            }
            Err(e) => {
                log::debug!("{e}, using placeholder reading");
                placeholder
            }
        };

        let point = Point::now(value);
        *last = Some((now, point));
        Some(point)
    }

    pub fn last_point(&self) -> Option<Point> {
        lock(&self.last).map(|(_, point)| point)
    }
}

impl std::fmt::Debug for SensorReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorReader")
            .field("sensor", &self.sensor.name())
            .field("debounce", &self.debounce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::clock::ManualClock;

    struct CountingSensor {
        reads: AtomicUsize,
        fail: AtomicBool,
    }

    impl Sensor for CountingSensor {
        fn name(&self) -> &str {
            "counting"
        }

        fn measure(&self) -> Result<f64, SensorError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                Err(SensorError::Parse {
                    name: "counting".into(),
                    value: "garbage".into(),
                })
            } else {
                Ok(n as f64 * 100.0)
            }
        }
    }

    fn counting() -> Arc<CountingSensor> {
        Arc::new(CountingSensor {
            reads: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_debounce_returns_cached_point() {
        let sensor = counting();
        let clock = Arc::new(ManualClock::new());
        let reader = SensorReader::new(sensor.clone()).with_clock(clock.clone());

        let first = reader.measure_point().unwrap();
        clock.advance(Duration::from_millis(10));
        let second = reader.measure_point().unwrap();
        assert_eq!(first.value(), second.value());
        assert_eq!(sensor.reads.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_millis(60));
        let third = reader.measure_point().unwrap();
        assert_eq!(third.value(), 200.0);
        assert_eq!(sensor.reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_debounce_always_reads() {
        let sensor = counting();
        let reader = SensorReader::new(sensor.clone())
            .with_clock(Arc::new(ManualClock::new()))
            .with_debounce(Duration::ZERO);

        for _ in 0..3 {
            reader.measure_point();
        }
        assert_eq!(sensor.reads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_read_failure_yields_placeholder() {
        let sensor = counting();
        let clock = Arc::new(ManualClock::new());
        let reader = SensorReader::new(sensor.clone()).with_clock(clock.clone());

        sensor.fail.store(true, Ordering::SeqCst);
        assert_eq!(reader.measure_point().unwrap().value(), 0.0);

        sensor.fail.store(false, Ordering::SeqCst);
        clock.advance(Duration::from_secs(1));
        assert_eq!(reader.measure_point().unwrap().value(), 300.0);

        sensor.fail.store(true, Ordering::SeqCst);
        clock.advance(Duration::from_secs(1));
        assert_eq!(reader.measure_point().unwrap().value(), 300.0);
    }

    #[test]
    fn test_non_finite_reading_yields_placeholder() {
        let reader = SensorReader::new(Arc::new(MemorySensor::new(
            "power",
            [f64::NAN, 1000.0, f64::INFINITY, f64::NEG_INFINITY, 1200.0],
        )))
        .with_clock(Arc::new(ManualClock::new()))
        .with_debounce(Duration::ZERO);

        let values: Vec<f64> = (0..5)
            .map(|_| reader.measure_point().unwrap().value())
            .collect();
        assert_eq!(values, vec![0.0, 1000.0, 1000.0, 1000.0, 1200.0]);
    }

    #[test]
    fn test_unsupported_sensor_yields_nothing() {
        let reader = SensorReader::new(Arc::new(FileSensor::new(
            "missing",
            "/nonexistent/cadenza-power/current_now",
            1.0,
        )));
        assert!(!reader.is_supported());
        assert!(reader.measure_point().is_none());
        assert!(reader.last_point().is_none());
    }
}
