//! Battery life estimation from measured power and fitted component models.

mod estimate;

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

pub use self::estimate::{
    BatteryEstimate, BatteryLife, CpuState, EstimateInput, PowerSnapshot, estimate, life_minutes,
};
use crate::{
    charger::ChargerListener,
    clock::{Clock, SystemClock},
    collection::{ChargingMode, CollectionTask},
    model::{ModelKind, ModelListener, ModelManager},
    statistics::AverageWindow,
    sync::{Listeners, lock},
};

pub const DEFAULT_MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CHARGER_SETTLE: Duration = Duration::from_secs(3);

pub trait BatteryModelListener: Send + Sync {
    fn on_model_changed(&self, estimate: &BatteryEstimate);
}

#[derive(Debug, Default)]
struct State {
    brightness: Option<f64>,
    charging: bool,
    level: Option<f64>,
    capacity_mwh: Option<f64>,
    cpu: Option<CpuState>,
    last_update: Option<Instant>,
    settle_until: Option<Instant>,
    estimate: Option<BatteryEstimate>,
}

/// Turns the power collection task's statistics into battery life estimates.
///
/// Estimates are recomputed on demand at most every `min_update_interval`,
/// and immediately whenever brightness, battery level, charging state or a
/// component model changes. After a charging transition one more
/// recomputation is forced once the settle period has passed, since the
/// first readings in the new mode are unreliable.
pub struct BatteryModel {
    power: Arc<CollectionTask>,
    models: Arc<ModelManager>,
    clock: Arc<dyn Clock>,
    min_update_interval: Duration,
    charger_settle: Duration,
    state: Mutex<State>,
    listeners: Listeners<dyn BatteryModelListener>,
}

impl BatteryModel {
    pub fn new(
        power: Arc<CollectionTask>,
        models: Arc<ModelManager>,
        capacity_mwh: Option<f64>,
    ) -> Self {
        let state = State {
            charging: power.is_charging(),
            capacity_mwh,
            ..Default::default()
        };

        Self {
            power,
            models,
            clock: Arc::new(SystemClock),
            min_update_interval: DEFAULT_MIN_UPDATE_INTERVAL,
            charger_settle: DEFAULT_CHARGER_SETTLE,
            state: Mutex::new(state),
            listeners: Listeners::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_min_update_interval(mut self, interval: Duration) -> Self {
        self.min_update_interval = interval;
        self
    }

    pub fn with_charger_settle(mut self, settle: Duration) -> Self {
        self.charger_settle = settle;
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn BatteryModelListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BatteryModelListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// The most recent estimate, if one has been computed.
    pub fn estimate(&self) -> Option<BatteryEstimate> {
        lock(&self.state).estimate
    }

    pub fn brightness(&self) -> Option<f64> {
        lock(&self.state).brightness
    }

    pub fn level(&self) -> Option<f64> {
        lock(&self.state).level
    }

    pub fn is_charging(&self) -> bool {
        lock(&self.state).charging
    }

    pub fn capacity_mwh(&self) -> Option<f64> {
        lock(&self.state).capacity_mwh
    }

    pub fn set_brightness(&self, brightness: f64) {
        let changed = {
            let mut state = lock(&self.state);
            state.brightness.replace(brightness) != Some(brightness)
        };
        if changed {
            self.update_model();
        }
    }

    pub fn set_level(&self, level: f64) {
        let level = level.clamp(0.0, 100.0);
        let changed = {
            let mut state = lock(&self.state);
            state.level.replace(level) != Some(level)
        };
        if changed {
            self.update_model();
        }
    }

    pub fn set_charging(&self, charging: bool) {
        let changed = {
            let mut state = lock(&self.state);
            let changed = state.charging != charging;
            if changed {
                state.charging = charging;
                state.settle_until = Some(self.clock.now() + self.charger_settle);
            }
            changed
        };
        if changed {
            log::debug!("battery model switched to {}", ChargingMode::from_charging(charging));
            self.update_model();
        }
    }

    pub fn set_capacity(&self, capacity_mwh: Option<f64>) {
        lock(&self.state).capacity_mwh = capacity_mwh;
    }

    /// CPU state used for the CPU power component on the next recomputation.
    pub fn set_cpu_state(&self, cpu: Option<CpuState>) {
        lock(&self.state).cpu = cpu;
    }

    /// Recompute if the rate limit allows it, or if a charging transition
    /// has just settled.
    pub fn update_if_due(&self) -> Option<BatteryEstimate> {
        let now = self.clock.now();
        let due = {
            let mut state = lock(&self.state);
            match state.settle_until {
                Some(deadline) if now >= deadline => {
                    state.settle_until = None;
                    true
                }
                Some(_) => false,
                None => state
                    .last_update
                    .is_none_or(|last| now.duration_since(last) >= self.min_update_interval),
            }
        };

        due.then(|| self.update_model())
    }

    /// Recompute the estimate now and notify listeners.
    pub fn update_model(&self) -> BatteryEstimate {
        let mut input = EstimateInput {
            screen_model: self.models.get(ModelKind::Screen),
            cpu_load_model: self.models.get(ModelKind::CpuLoad),
            cpu_frequency_model: self.models.get(ModelKind::CpuFrequency),
            ..Default::default()
        };
        {
            let state = lock(&self.state);
            input.charging = state.charging;
            input.level = state.level;
            input.capacity_mwh = state.capacity_mwh;
            input.brightness = state.brightness;
            input.cpu = state.cpu;
        }
        let mode = ChargingMode::from_charging(input.charging);

        let snapshot = self.snapshot(mode);
        let estimate = estimate(&snapshot, &input);
        log::debug!(
            "battery estimate: {:?} mW, life {:.1} min",
            estimate.power,
            estimate.life.as_minutes()
        );

        {
            let mut state = lock(&self.state);
            state.estimate = Some(estimate);
            state.last_update = Some(self.clock.now());
        }

        self.listeners.notify(|l| l.on_model_changed(&estimate));
        estimate
    }

    /// Snapshot each statistics object under its own lock.
    fn snapshot(&self, mode: ChargingMode) -> PowerSnapshot {
        let realtime = self.power.realtime_for(mode).snapshot(AverageWindow::Full);
        let lifetime_average =
            |mode| self.power.lifetime_for(mode).and_then(|stats| stats.average());

        PowerSnapshot {
            realtime: realtime.average,
            realtime_weight: realtime.weight,
            realtime_counterweight: realtime.counterweight,
            lifetime: lifetime_average(mode),
            lifetime_battery: lifetime_average(ChargingMode::Battery),
            lifetime_charger: lifetime_average(ChargingMode::Charger),
        }
    }
}

impl ChargerListener for BatteryModel {
    fn on_charger_connected(&self) {
        self.set_charging(true);
    }

    fn on_charger_disconnected(&self) {
        self.set_charging(false);
    }

    fn on_battery_level_changed(&self, level: u8) {
        self.set_level(level as f64);
    }
}

impl ModelListener for BatteryModel {
    fn on_model_changed(&self, kind: ModelKind) {
        log::debug!("{kind} model changed, updating battery estimate");
        self.update_model();
    }
}

impl std::fmt::Debug for BatteryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatteryModel")
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}
