use std::{
    path::Path,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::{
    battery::{BatteryEstimate, BatteryModel, CpuState},
    benchmark::{BacklightParameter, Benchmark, BenchmarkConfig, LoadGenerator, Parameter},
    charger::{ChargerEvents, ChargerListener, SystemChargerMonitor},
    clock::{Clock, SystemClock},
    collection::{ChargingMode, CollectionTask, LifetimeCollectionTask},
    model::ModelManager,
    persistence::StateStore,
    sensor::{
        Backlight, BacklightSensor, CpuFrequencySensor, CpuLoadSensor, HeuristicPowerEstimator,
        POWER_SUPPLY_ROOT, PowerSensor, Sensor, SensorReader, detect_battery_path,
        read_capacity_mwh,
    },
    settings::PowerConfig,
    sync::lock,
};

/// Charger poll interval for [`SystemChargerMonitor`].
const CHARGER_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkKind {
    Brightness,
    Cpu,
}

impl FromStr for BenchmarkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "brightness" | "screen" => Ok(Self::Brightness),
            "cpu" | "cpu_load" => Ok(Self::Cpu),
            other => anyhow::bail!("unknown benchmark {other:?}, expected brightness or cpu"),
        }
    }
}

/// Devices the context samples besides power.
#[derive(Default)]
pub struct Devices {
    pub backlight: Option<Backlight>,
    pub brightness: Option<Arc<dyn Sensor>>,
    pub cpu_load: Option<Arc<dyn Sensor>>,
    pub cpu_frequency: Option<Arc<dyn Sensor>>,
}

/// Owns every service and the listener wiring between them.
pub struct PowerContext {
    config: PowerConfig,
    store: StateStore,
    devices: Devices,
    charger: Arc<ChargerEvents>,
    charger_monitor: SystemChargerMonitor,
    power: LifetimeCollectionTask,
    models: Arc<ModelManager>,
    battery: Arc<BatteryModel>,
    benchmark: Mutex<Option<Arc<Benchmark>>>,
}

impl PowerContext {
    /// Build the context against the running system's sysfs and procfs.
    pub fn from_config(config: PowerConfig) -> Result<Self> {
        let state_dir = match &config.persistence.state_dir {
            Some(dir) => dir.clone(),
            None => StateStore::default_dir()?,
        };

        let battery_path = match &config.sensors.power_supply {
            Some(name) => Some(Path::new(POWER_SUPPLY_ROOT).join(name)),
            None => detect_battery_path(Path::new(POWER_SUPPLY_ROOT)),
        };
        match &battery_path {
            Some(path) => log::info!("using battery at {}", path.display()),
            None => log::warn!("no battery found, power will be estimated"),
        }

        let backlight = match Backlight::detect(config.sensors.backlight.as_deref()) {
            Ok(backlight) => Some(backlight),
            Err(e) => {
                log::warn!("no usable backlight: {e}");
                None
            }
        };

        let devices = Devices {
            brightness: backlight
                .clone()
                .map(|b| Arc::new(BacklightSensor::new(b)) as Arc<dyn Sensor>),
            backlight,
            cpu_load: Some(Arc::new(CpuLoadSensor::new(None))),
            cpu_frequency: Some(Arc::new(CpuFrequencySensor::new(None))),
        };

        let estimator = HeuristicPowerEstimator::new(
            devices.brightness.clone(),
            devices.cpu_load.clone(),
            devices.cpu_frequency.clone(),
        );
        let capacity = config
            .battery
            .capacity_mwh
            .or_else(|| battery_path.as_deref().and_then(read_capacity_mwh));
        let sensor = PowerSensor::new(battery_path).with_estimator(Arc::new(estimator));

        Ok(Self::with_parts(
            config,
            StateStore::new(state_dir),
            Arc::new(sensor),
            devices,
            capacity,
            Arc::new(SystemClock),
        ))
    }

    /// Build the context from explicit parts.
    pub fn with_parts(
        config: PowerConfig,
        store: StateStore,
        power_sensor: Arc<dyn Sensor>,
        devices: Devices,
        capacity_mwh: Option<f64>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if capacity_mwh.is_none() {
            log::warn!("battery capacity unknown, battery life can't be estimated");
        }

        let reader = SensorReader::new(power_sensor)
            .with_clock(clock.clone())
            .with_debounce(config.sampling.debounce());
        let power = LifetimeCollectionTask::new(
            reader,
            config.statistics,
            config.sampling.interval(),
            store.clone(),
            config.persistence.save_interval(),
        );

        let models = Arc::new(ModelManager::new(store.clone()));
        let battery = Arc::new(
            BatteryModel::new(power.task().clone(), models.clone(), capacity_mwh)
                .with_clock(clock)
                .with_min_update_interval(config.battery.min_update_interval())
                .with_charger_settle(config.battery.charger_settle()),
        );

        let charger = Arc::new(ChargerEvents::new());
        charger.add_listener(power.task().clone());
        charger.add_listener(battery.clone());
        models.add_listener(battery.clone());

        Self {
            charger_monitor: SystemChargerMonitor::new(charger.clone(), CHARGER_POLL_INTERVAL),
            config,
            store,
            devices,
            charger,
            power,
            models,
            battery,
            benchmark: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn charger(&self) -> &Arc<ChargerEvents> {
        &self.charger
    }

    pub fn power(&self) -> &LifetimeCollectionTask {
        &self.power
    }

    pub fn power_task(&self) -> &Arc<CollectionTask> {
        self.power.task()
    }

    pub fn models(&self) -> &Arc<ModelManager> {
        &self.models
    }

    pub fn battery(&self) -> &Arc<BatteryModel> {
        &self.battery
    }

    /// Start sampling, saving and charger polling.
    pub fn start(&self) {
        self.charger_monitor.start();
        self.power.start();
    }

    pub async fn stop(&self) {
        let benchmark = lock(&self.benchmark).take();
        if let Some(benchmark) = benchmark {
            benchmark.stop().await;
        }

        self.charger_monitor.stop().await;
        self.power.stop().await;
    }

    /// Read brightness and CPU state into the battery model, then update the
    /// estimate if it's due.
    pub fn refresh(&self) -> Option<BatteryEstimate> {
        if let Some(brightness) = measure(&self.devices.brightness) {
            self.battery.set_brightness(brightness.round());
        }

        let load = measure(&self.devices.cpu_load);
        let frequency_mhz = measure(&self.devices.cpu_frequency);
        let cpu = match (load, frequency_mhz) {
            (Some(load), Some(frequency_mhz)) => Some(CpuState {
                load,
                frequency_mhz,
            }),
            _ => None,
        };
        self.battery.set_cpu_state(cpu);

        self.battery.update_if_due()
    }

    /// Build a benchmark that stores its fit in the model manager and pauses
    /// while a charger is connected.
    pub fn benchmark(&self, kind: BenchmarkKind) -> Result<Arc<Benchmark>> {
        let (config, parameter) = match kind {
            BenchmarkKind::Brightness => {
                let backlight = self
                    .devices
                    .backlight
                    .clone()
                    .context("brightness benchmark needs a backlight")?;
                (
                    self.config.benchmark.brightness(),
                    Arc::new(BacklightParameter::new(backlight)) as Arc<dyn Parameter>,
                )
            }
            BenchmarkKind::Cpu => (
                self.config.benchmark.cpu_load(),
                Arc::new(LoadGenerator::for_all_cores()) as Arc<dyn Parameter>,
            ),
        };

        self.benchmark_with(config, parameter)
    }

    pub fn benchmark_with(
        &self,
        config: BenchmarkConfig,
        parameter: Arc<dyn Parameter>,
    ) -> Result<Arc<Benchmark>> {
        let mut current = lock(&self.benchmark);
        if current.as_ref().is_some_and(|b| b.is_running()) {
            anyhow::bail!("a benchmark is already running");
        }

        let benchmark = Arc::new(
            Benchmark::new(config, parameter, self.power.task().clone())
                .with_models(self.models.clone()),
        );
        benchmark.set_charger_connected(self.charger.is_charging());
        self.charger.add_listener(benchmark.clone());

        if let Some(previous) = current.replace(benchmark.clone()) {
            let previous: Arc<dyn ChargerListener> = previous;
            self.charger.remove_listener(&previous);
        }

        Ok(benchmark)
    }

    /// The lifetime-backed power mode currently sampled.
    pub fn mode(&self) -> ChargingMode {
        self.power.task().mode()
    }
}

fn measure(sensor: &Option<Arc<dyn Sensor>>) -> Option<f64> {
    let sensor = sensor.as_ref()?;
    match sensor.measure() {
        Ok(value) => Some(value),
        Err(e) => {
            log::debug!("couldn't read {}: {}", sensor.name(), e);
            None
        }
    }
}

impl std::fmt::Debug for PowerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerContext")
            .field("store", &self.store)
            .field("power", &self.power)
            .field("battery", &self.battery)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        battery::BatteryLife,
        clock::ManualClock,
        model::{Model, ModelKind},
        sensor::MemorySensor,
        worker::StopSignal,
    };

    fn context(dir: &Path, power: Arc<dyn Sensor>, devices: Devices) -> PowerContext {
        let mut config = PowerConfig::default();
        config.sampling.debounce_ms = 0;
        config.sampling.interval_ms = 10;
        config.battery.min_update_interval_ms = 0;
        config.battery.charger_settle_ms = 0;

        PowerContext::with_parts(
            config,
            StateStore::new(dir),
            power,
            devices,
            Some(3000.0),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn test_benchmark_kind_parsing() {
        assert_eq!("brightness".parse::<BenchmarkKind>().unwrap(), BenchmarkKind::Brightness);
        assert_eq!("cpu".parse::<BenchmarkKind>().unwrap(), BenchmarkKind::Cpu);
        assert!("gpu".parse::<BenchmarkKind>().is_err());
    }

    #[test]
    fn test_charger_events_reach_collection_and_battery() {
        let dir = tempfile::tempdir().unwrap();
        let power = Arc::new(MemorySensor::constant("power", -900.0));
        let ctx = context(dir.path(), power, Devices::default());

        ctx.charger().set_level(30);
        ctx.charger().set_charging(true);

        assert_eq!(ctx.mode(), ChargingMode::Charger);
        assert!(ctx.battery().is_charging());
        assert_eq!(ctx.battery().level(), Some(30.0));

        let estimate = ctx.battery().update_model();
        assert_eq!(estimate.power, Some(900.0));
        assert!(estimate.life.is_known());
    }

    #[test]
    fn test_refresh_feeds_brightness() {
        let dir = tempfile::tempdir().unwrap();
        let devices = Devices {
            brightness: Some(Arc::new(MemorySensor::constant("brightness", 127.6))),
            ..Default::default()
        };
        let power = Arc::new(MemorySensor::constant("power", 500.0));
        let ctx = context(dir.path(), power, devices);
        ctx.power_task().sample_once();
        ctx.charger().set_level(50);

        let estimate = ctx.refresh().unwrap();
        assert_eq!(ctx.battery().brightness(), Some(128.0));
        assert_eq!(estimate.life, BatteryLife::Minutes(180.0));
    }

    #[test]
    fn test_brightness_benchmark_needs_backlight() {
        let dir = tempfile::tempdir().unwrap();
        let power = Arc::new(MemorySensor::constant("power", 500.0));
        let ctx = context(dir.path(), power, Devices::default());
        assert!(ctx.benchmark(BenchmarkKind::Brightness).is_err());
    }

    #[tokio::test]
    async fn test_benchmark_result_reaches_battery_model() {
        struct Level(Arc<Mutex<f64>>);

        impl Parameter for Level {
            fn name(&self) -> &str {
                "level"
            }

            fn set(&self, value: f64) -> Result<()> {
                *lock(&self.0) = value;
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let level = Arc::new(Mutex::new(0.0));
        let source = level.clone();
        let sensor = crate::sensor::FnSensor::new("power", move || 400.0 + *lock(&source) * 3.0);
        let ctx = context(dir.path(), Arc::new(sensor), Devices::default());

        let config = BenchmarkConfig::brightness(85.0, Duration::ZERO, Duration::ZERO);
        let benchmark = ctx.benchmark_with(config, Arc::new(Level(level))).unwrap();
        let model = benchmark.run(StopSignal::never()).await.unwrap();

        assert_eq!(ctx.models().get(ModelKind::Screen), Some(model));
        match model {
            Model::Linear(linear) => {
                assert!((linear.slope - 3.0).abs() < 1e-9);
                assert!((linear.intercept - 400.0).abs() < 1e-6);
            }
            other => panic!("unexpected model {other:?}"),
        }

        ctx.battery().set_brightness(100.0);
        let estimate = ctx.battery().estimate().unwrap();
        assert_eq!(estimate.screen_power, Some(300.0));
        ctx.stop().await;
    }
}
