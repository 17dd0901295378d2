use std::{
    fs,
    path::{Path, PathBuf},
};

use super::{Sensor, SensorError};

pub const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Charging status of the battery.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChargingStatus {
    Charging,
    Discharging,
    Full,
    NotCharging,
}

/// Detect the battery sysfs directory under `root` by looking for a power
/// supply whose `type` is "Battery".
pub fn detect_battery_path(root: &Path) -> Option<PathBuf> {
    fs::read_dir(root).ok()?.find_map(|entry| {
        let path = entry.ok()?.path();
        let kind = fs::read_to_string(path.join("type")).ok()?;
        kind.trim().eq_ignore_ascii_case("battery").then_some(path)
    })
}

/// Read a single numeric sysfs attribute.
pub(crate) fn read_number(path: &Path) -> Result<f64, SensorError> {
    let name = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| SensorError::Read {
        name: name.clone(),
        source,
    })?;

    let trimmed = content.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(SensorError::Parse {
            name,
            value: trimmed.to_string(),
        }),
    }
}

/// Read charging status from sysfs.
pub fn read_charging_status(battery_path: &Path) -> ChargingStatus {
    fs::read_to_string(battery_path.join("status"))
        .ok()
        .and_then(|s| match s.trim() {
            "Charging" => Some(ChargingStatus::Charging),
            "Discharging" => Some(ChargingStatus::Discharging),
            "Full" => Some(ChargingStatus::Full),
            "Not charging" => Some(ChargingStatus::NotCharging),
            _ => None,
        })
        .unwrap_or(ChargingStatus::Discharging) // safe default
}

/// Full-charge battery capacity in milliwatt-hours.
///
/// Prefers `energy_full` (µWh). With only `charge_full` (µAh) the design
/// minimum voltage, or failing that the present voltage, converts it.
pub fn read_capacity_mwh(battery_path: &Path) -> Option<f64> {
    if let Ok(energy_full) = read_number(&battery_path.join("energy_full")) {
        return Some(energy_full / 1000.0);
    }

    let charge_full = read_number(&battery_path.join("charge_full")).ok()?;
    let voltage = read_number(&battery_path.join("voltage_min_design"))
        .or_else(|_| read_number(&battery_path.join("voltage_now")))
        .ok()?;

    // µAh × µV = 1e-12 Wh = 1e-9 mWh
    Some(charge_full * voltage / 1_000_000_000.0)
}

/// A sensor backed by one numeric file, scaled on read.
#[derive(Debug, Clone)]
pub struct FileSensor {
    name: String,
    path: PathBuf,
    scale: f64,
}

impl FileSensor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            scale,
        }
    }

    /// `current_now` of a power supply, in mA.
    pub fn current(battery_path: &Path) -> Self {
        Self::new("current", battery_path.join("current_now"), 0.001)
    }

    /// `voltage_now` of a power supply, in mV.
    pub fn voltage(battery_path: &Path) -> Self {
        Self::new("voltage", battery_path.join("voltage_now"), 0.001)
    }

    /// `capacity` of a power supply, in percent.
    pub fn level(battery_path: &Path) -> Self {
        Self::new("battery level", battery_path.join("capacity"), 1.0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sensor for FileSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_supported(&self) -> bool {
        self.path.exists()
    }

    fn measure(&self) -> Result<f64, SensorError> {
        read_number(&self.path).map(|value| value * self.scale)
    }
}
