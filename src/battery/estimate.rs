use serde::Serialize;

use crate::model::Model;

/// Powers below this many milliwatts are treated as no drain at all.
const MIN_POWER: f64 = 1e-3;
const MINUTES_PER_HOUR: f64 = 60.0;

/// Remaining (or, while charging, until-full) battery time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum BatteryLife {
    Minutes(f64),
    /// No usable power figure yet. Retry on the next trigger.
    Unknown,
    /// Charging, but the battery is still draining.
    InsufficientCharging,
}

impl BatteryLife {
    /// Minutes, with `+∞` for unknown and `-1` for insufficient charging.
    pub fn as_minutes(&self) -> f64 {
        match self {
            Self::Minutes(minutes) => *minutes,
            Self::Unknown => f64::INFINITY,
            Self::InsufficientCharging => -1.0,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Minutes(_))
    }
}

/// CPU state fed in by the caller for the CPU power component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct CpuState {
    /// Utilization in `0.0..=1.0`.
    pub load: f64,
    pub frequency_mhz: f64,
}

/// Power figures snapshotted from the power collection task. Values are in
/// the convention of the current mode (charging power positive while
/// charging, drain positive otherwise).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerSnapshot {
    pub realtime: Option<f64>,
    pub realtime_weight: f64,
    pub realtime_counterweight: f64,
    /// Lifetime average for the current mode.
    pub lifetime: Option<f64>,
    pub lifetime_battery: Option<f64>,
    pub lifetime_charger: Option<f64>,
}

/// Everything besides measured power an estimate depends on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EstimateInput {
    pub charging: bool,
    pub level: Option<f64>,
    pub capacity_mwh: Option<f64>,
    pub brightness: Option<f64>,
    pub cpu: Option<CpuState>,
    pub screen_model: Option<Model>,
    pub cpu_load_model: Option<Model>,
    pub cpu_frequency_model: Option<Model>,
}

/// One recomputation of the battery model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryEstimate {
    pub charging: bool,
    pub level: Option<f64>,
    /// Blended power in milliwatts.
    pub power: Option<f64>,
    pub screen_power: Option<f64>,
    pub base_power: Option<f64>,
    /// Model prediction for the supplied CPU state. Informational only.
    pub cpu_power: Option<f64>,
    pub life: BatteryLife,
}

fn blend(a: Option<f64>, weight: f64, b: Option<f64>, counterweight: f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a * weight + b * counterweight),
        (a, b) => a.or(b),
    }
}

/// Battery life in minutes for `power` milliwatts.
pub fn life_minutes(capacity_mwh: f64, level: f64, charging: bool, power: f64) -> BatteryLife {
    if !power.is_finite() || power.abs() < MIN_POWER || power < 0.0 {
        return BatteryLife::Unknown;
    }

    let level = level.clamp(0.0, 100.0);
    let effective_level = if charging { 100.0 - level } else { level };
    BatteryLife::Minutes(capacity_mwh * MINUTES_PER_HOUR * effective_level / (100.0 * power))
}

/// Decompose and blend the snapshot into a battery estimate.
pub fn estimate(snapshot: &PowerSnapshot, input: &EstimateInput) -> BatteryEstimate {
    let w = snapshot.realtime_weight;
    let cw = snapshot.realtime_counterweight;

    let mut power = blend(snapshot.realtime, w, snapshot.lifetime, cw);
    let mut screen_power = None;
    let mut base_power = None;

    if let (Some(model), Some(brightness)) = (input.screen_model, input.brightness) {
        let screen = model.predict(brightness);
        screen_power = Some(screen);

        let base = if input.charging {
            // what the charger supplies in total, the screen included
            let gross = snapshot.realtime.map(|rt| rt + screen);
            let complement = snapshot
                .lifetime_charger
                .map(|charger| charger + snapshot.lifetime_battery.unwrap_or(0.0));
            blend(gross, w, complement, cw)
        } else {
            let measured = snapshot.realtime.map(|rt| rt - screen);
            blend(measured, w, model.intercept(), cw)
        };

        if let Some(base) = base {
            base_power = Some(base);
            power = Some(if input.charging { base - screen } else { base + screen });
        }
    }

    let cpu_power = input.cpu.and_then(|cpu| {
        let load = input.cpu_load_model.map(|m| m.predict(cpu.load));
        let frequency = input.cpu_frequency_model.map(|m| m.predict(cpu.frequency_mhz));
        match (load, frequency) {
            (None, None) => None,
            (load, frequency) => Some(load.unwrap_or(0.0) + frequency.unwrap_or(0.0)),
        }
    });

    let life = match (power, input.capacity_mwh, input.level) {
        _ if input.charging && snapshot.realtime.is_some_and(|rt| rt < 0.0) => {
            BatteryLife::InsufficientCharging
        }
        (Some(power), Some(capacity), Some(level)) => {
            life_minutes(capacity, level, input.charging, power)
        }
        _ => BatteryLife::Unknown,
    };

    BatteryEstimate {
        charging: input.charging,
        level: input.level,
        power,
        screen_power,
        base_power,
        cpu_power,
        life,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinearModel, LinearModelAtOrigin};

    fn realtime_only(power: f64) -> PowerSnapshot {
        PowerSnapshot {
            realtime: Some(power),
            realtime_weight: 0.25,
            realtime_counterweight: 0.75,
            ..Default::default()
        }
    }

    fn discharging(level: f64) -> EstimateInput {
        EstimateInput {
            level: Some(level),
            capacity_mwh: Some(3000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_life_from_capacity_level_and_power() {
        let estimate = estimate(&realtime_only(500.0), &discharging(50.0));
        assert_eq!(estimate.power, Some(500.0));
        // 3000 * 60 * 50 / (100 * 500)
        assert_eq!(estimate.life, BatteryLife::Minutes(180.0));
    }

    #[test]
    fn test_charging_counts_time_to_full() {
        let mut input = discharging(75.0);
        input.charging = true;

        let estimate = estimate(&realtime_only(1000.0), &input);
        // 3000 * 60 * 25 / (100 * 1000)
        assert_eq!(estimate.life, BatteryLife::Minutes(45.0));
    }

    #[test]
    fn test_blend_uses_weight_and_counterweight() {
        let snapshot = PowerSnapshot {
            realtime: Some(1000.0),
            realtime_weight: 0.25,
            realtime_counterweight: 0.75,
            lifetime: Some(600.0),
            ..Default::default()
        };
        let estimate = estimate(&snapshot, &discharging(50.0));
        assert_eq!(estimate.power, Some(700.0));
    }

    #[test]
    fn test_sentinels_are_distinct() {
        let unknown = estimate(&PowerSnapshot::default(), &discharging(50.0));
        assert_eq!(unknown.life, BatteryLife::Unknown);
        assert_eq!(unknown.life.as_minutes(), f64::INFINITY);

        let zero = estimate(&realtime_only(0.0), &discharging(50.0));
        assert_eq!(zero.life, BatteryLife::Unknown);

        let mut charging = discharging(50.0);
        charging.charging = true;
        let insufficient = estimate(&realtime_only(-200.0), &charging);
        assert_eq!(insufficient.life, BatteryLife::InsufficientCharging);
        assert_eq!(insufficient.life.as_minutes(), -1.0);

        assert_ne!(unknown.life, insufficient.life);
        assert!(!unknown.life.is_known() && !insufficient.life.is_known());
    }

    #[test]
    fn test_screen_decomposition_while_discharging() {
        let mut input = discharging(50.0);
        input.brightness = Some(100.0);
        input.screen_model = Some(Model::Linear(LinearModel {
            slope: 2.0,
            intercept: 300.0,
        }));

        // realtime base 900 - 200 = 700, blended with the model's 300
        let estimate = estimate(&realtime_only(900.0), &input);
        assert_eq!(estimate.screen_power, Some(200.0));
        assert_eq!(estimate.base_power, Some(700.0 * 0.25 + 300.0 * 0.75));
        assert_eq!(estimate.power, Some(400.0 + 200.0));
    }

    #[test]
    fn test_screen_decomposition_while_charging() {
        let snapshot = PowerSnapshot {
            realtime: Some(1500.0),
            realtime_weight: 0.25,
            realtime_counterweight: 0.75,
            lifetime: Some(1400.0),
            lifetime_battery: Some(600.0),
            lifetime_charger: Some(1400.0),
        };
        let mut input = discharging(50.0);
        input.charging = true;
        input.brightness = Some(100.0);
        input.screen_model = Some(Model::LinearAtOrigin(LinearModelAtOrigin { slope: 2.0 }));

        let estimate = estimate(&snapshot, &input);
        // gross 1700 against a complement of 2000
        assert_eq!(estimate.base_power, Some(1700.0 * 0.25 + 2000.0 * 0.75));
        assert_eq!(estimate.power, Some(1925.0 - 200.0));
        assert!(estimate.life.is_known());
    }

    #[test]
    fn test_cpu_component() {
        let mut input = discharging(50.0);
        input.cpu = Some(CpuState {
            load: 0.5,
            frequency_mhz: 2000.0,
        });
        input.cpu_load_model = Some(Model::LinearAtOrigin(LinearModelAtOrigin { slope: 800.0 }));

        let estimate = estimate(&realtime_only(500.0), &input);
        assert_eq!(estimate.cpu_power, Some(400.0));
        assert_eq!(estimate.power, Some(500.0));
    }
}
