use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use super::{
    Sensor, SensorError,
    backlight::MAX_LEVEL,
    sysfs::{ChargingStatus, read_charging_status, read_number},
};

/// Produces a power estimate (mW) when it cannot be measured.
pub trait PowerEstimator: Send + Sync {
    fn estimate(&self) -> Option<f64>;
}

/// Battery power in mW: positive while discharging, negative while charging.
///
/// Reads `current_now × voltage_now`, falls back to `power_now`, then to an
/// estimator for devices without usable current sensing.
pub struct PowerSensor {
    battery_path: Option<PathBuf>,
    estimator: Option<Arc<dyn PowerEstimator>>,
}

impl PowerSensor {
    pub fn new(battery_path: Option<PathBuf>) -> Self {
        Self {
            battery_path,
            estimator: None,
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn PowerEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn battery_path(&self) -> Option<&Path> {
        self.battery_path.as_deref()
    }

    fn measure_sysfs(battery_path: &Path) -> Result<f64, SensorError> {
        // µW, or µA × µV / 1e9
        let microwatts = match (
            read_number(&battery_path.join("current_now")),
            read_number(&battery_path.join("voltage_now")),
        ) {
            (Ok(current), Ok(voltage)) => current.abs() * voltage / 1_000_000.0,
            (Err(e), _) | (_, Err(e)) => {
                log::debug!("{e}, trying power_now");
                read_number(&battery_path.join("power_now"))?.abs()
            }
        };

        let milliwatts = microwatts / 1000.0;
        Ok(match read_charging_status(battery_path) {
            ChargingStatus::Charging => -milliwatts,
            _ => milliwatts,
        })
    }
}

impl Sensor for PowerSensor {
    fn name(&self) -> &str {
        "power"
    }

    fn is_supported(&self) -> bool {
        self.battery_path.as_deref().is_some_and(Path::exists) || self.estimator.is_some()
    }

    fn measure(&self) -> Result<f64, SensorError> {
        let measured = match self.battery_path.as_deref() {
            Some(path) => Self::measure_sysfs(path),
            None => Err(SensorError::Unavailable("battery power supply".to_string())),
        };

        match measured {
            Ok(power) => Ok(power),
            Err(e) => match self.estimator.as_ref().and_then(|estimator| estimator.estimate()) {
                Some(estimate) => {
                    log::debug!("{e}, using estimated power");
                    Ok(estimate)
                }
                None => Err(e),
            },
        }
    }
}

/// Idle draw with the screen off and the CPU quiet (mW).
const IDLE_POWER: f64 = 250.0;

/// Screen draw per brightness level (mW).
const SCREEN_LINEAR: f64 = 1.1;

/// Screen draw per squared brightness level (mW).
const SCREEN_QUADRATIC: f64 = 0.0035;

/// CPU draw per MHz at full load (mW).
const CPU_PER_MHZ: f64 = 0.45;

/// Polynomial power estimate from brightness, CPU load and CPU frequency.
///
/// Missing inputs contribute nothing.
pub struct HeuristicPowerEstimator {
    brightness: Option<Arc<dyn Sensor>>,
    cpu_load: Option<Arc<dyn Sensor>>,
    cpu_frequency: Option<Arc<dyn Sensor>>,
}

impl HeuristicPowerEstimator {
    pub fn new(
        brightness: Option<Arc<dyn Sensor>>,
        cpu_load: Option<Arc<dyn Sensor>>,
        cpu_frequency: Option<Arc<dyn Sensor>>,
    ) -> Self {
        Self {
            brightness,
            cpu_load,
            cpu_frequency,
        }
    }

    /// The estimate for explicit inputs: brightness 0-255, load 0-1, MHz.
    pub fn estimate_from(brightness: f64, cpu_load: f64, cpu_mhz: f64) -> f64 {
        let brightness = brightness.clamp(0.0, MAX_LEVEL);
        let screen = SCREEN_LINEAR * brightness + SCREEN_QUADRATIC * brightness * brightness;
        let cpu = cpu_load.clamp(0.0, 1.0) * cpu_mhz.max(0.0) * CPU_PER_MHZ;

        IDLE_POWER + screen + cpu
    }
}

fn read_optional(sensor: &Option<Arc<dyn Sensor>>) -> f64 {
    sensor
        .as_ref()
        .filter(|s| s.is_supported())
        .and_then(|s| s.measure().ok())
        .unwrap_or(0.0)
}

impl PowerEstimator for HeuristicPowerEstimator {
    fn estimate(&self) -> Option<f64> {
        Some(Self::estimate_from(
            read_optional(&self.brightness),
            read_optional(&self.cpu_load),
            read_optional(&self.cpu_frequency),
        ))
    }
}
