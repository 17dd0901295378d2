mod lifetime;

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::time::MissedTickBehavior;

pub use self::lifetime::LifetimeCollectionTask;
use crate::{
    charger::ChargerListener,
    point::Point,
    sensor::SensorReader,
    statistics::{AverageWindow, RealtimeStatistics, Statistics, StatisticsConfig},
    sync::{Listeners, lock},
    worker::Worker,
};

/// Default time between samples.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Receives every sample a collection task takes, in sampling order.
pub trait MeasurementListener: Send + Sync {
    fn on_measurement_received(&self, point: Point);
}

/// Which pair of statistics new samples go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChargingMode {
    Battery,
    Charger,
}

impl ChargingMode {
    pub fn from_charging(charging: bool) -> Self {
        if charging { Self::Charger } else { Self::Battery }
    }

    pub fn is_charger(self) -> bool {
        self == Self::Charger
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::Charger => "charger",
        }
    }
}

impl fmt::Display for ChargingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ModeStatistics {
    realtime: Arc<RealtimeStatistics>,
    lifetime: Option<Arc<Statistics>>,
}

impl ModeStatistics {
    fn new(config: StatisticsConfig, mode: ChargingMode, lifetime: Option<Arc<Statistics>>) -> Self {
        let realtime = RealtimeStatistics::new(config, mode.is_charger());
        if let Some(lifetime) = &lifetime {
            realtime.set_lifetime(Arc::downgrade(lifetime));
        }

        Self {
            realtime: Arc::new(realtime),
            lifetime,
        }
    }
}

/// Periodically samples one sensor into the statistics for the current
/// charging mode and forwards each sample to listeners.
///
/// `start` needs a tokio runtime. A running task holds a reference to
/// itself until `stop` is awaited.
pub struct CollectionTask {
    reader: SensorReader,
    interval: Duration,
    battery: ModeStatistics,
    charger: ModeStatistics,
    charging: AtomicBool,
    // serializes sampling so listeners see points in order
    sample_lock: Mutex<()>,
    listeners: Listeners<dyn MeasurementListener>,
    worker: Mutex<Option<Worker>>,
}

impl CollectionTask {
    pub fn new(reader: SensorReader, config: StatisticsConfig, interval: Duration) -> Self {
        Self::build(reader, config, interval, None, None)
    }

    /// A task that also accumulates into lifetime statistics, which back the
    /// rolling windows while they fill.
    pub fn with_lifetime(
        reader: SensorReader,
        config: StatisticsConfig,
        interval: Duration,
        battery_lifetime: Arc<Statistics>,
        charger_lifetime: Arc<Statistics>,
    ) -> Self {
        Self::build(
            reader,
            config,
            interval,
            Some(battery_lifetime),
            Some(charger_lifetime),
        )
    }

    fn build(
        reader: SensorReader,
        config: StatisticsConfig,
        interval: Duration,
        battery_lifetime: Option<Arc<Statistics>>,
        charger_lifetime: Option<Arc<Statistics>>,
    ) -> Self {
        Self {
            reader,
            interval: interval.max(Duration::from_millis(1)),
            battery: ModeStatistics::new(config, ChargingMode::Battery, battery_lifetime),
            charger: ModeStatistics::new(config, ChargingMode::Charger, charger_lifetime),
            charging: AtomicBool::new(false),
            sample_lock: Mutex::new(()),
            listeners: Listeners::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.reader.sensor().name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reader(&self) -> &SensorReader {
        &self.reader
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Start the sampling loop. Returns `false` if it was already running.
    /// A loop that ended on its own is replaced.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return false;
        }
        if worker.take().is_some() {
            log::warn!("{} collection loop had ended, restarting", self.name());
        }

        let task = Arc::clone(self);
        *worker = Some(Worker::spawn("collection", move |mut signal| async move {
            let mut ticker = tokio::time::interval(task.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.stopped() => break,
                    _ = ticker.tick() => {
                        if signal.is_stopped() {
                            break;
                        }
                        task.sample_once();
                    }
                }
            }
        }));

        log::debug!("{} collection started", self.name());
        true
    }

    /// Stop the sampling loop and wait for it to exit. No listener is called
    /// by the loop once this returns. Stopping a stopped task does nothing.
    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.stop().await;
            log::debug!("{} collection stopped", self.name());
        }
    }

    /// Take one sample right now, outside the periodic schedule.
    pub fn sample_once(&self) -> Option<Point> {
        let _sampling = lock(&self.sample_lock);

        let point = self.reader.measure_point()?;
        let stats = self.stats_for(self.mode());
        stats.realtime.add_point(point);
        if let Some(lifetime) = &stats.lifetime {
            lifetime.add_point(point);
        }

        self.listeners.notify(|l| l.on_measurement_received(point));
        Some(point)
    }

    pub fn is_charging(&self) -> bool {
        self.charging.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> ChargingMode {
        ChargingMode::from_charging(self.is_charging())
    }

    /// Switch the active statistics. If the newly active window is empty a
    /// sample is taken immediately so a value is available before the next
    /// tick.
    pub fn set_charging(&self, charging: bool) {
        if self.charging.swap(charging, Ordering::SeqCst) == charging {
            return;
        }

        log::debug!("{} collection switched to {} mode", self.name(), self.mode());
        if self.realtime().is_empty() {
            self.sample_once();
        }
    }

    fn stats_for(&self, mode: ChargingMode) -> &ModeStatistics {
        match mode {
            ChargingMode::Battery => &self.battery,
            ChargingMode::Charger => &self.charger,
        }
    }

    /// Rolling statistics for the current mode.
    pub fn realtime(&self) -> Arc<RealtimeStatistics> {
        self.realtime_for(self.mode())
    }

    pub fn realtime_for(&self, mode: ChargingMode) -> Arc<RealtimeStatistics> {
        self.stats_for(mode).realtime.clone()
    }

    /// Lifetime statistics for the current mode, if this task keeps any.
    pub fn lifetime(&self) -> Option<Arc<Statistics>> {
        self.lifetime_for(self.mode())
    }

    pub fn lifetime_for(&self, mode: ChargingMode) -> Option<Arc<Statistics>> {
        self.stats_for(mode).lifetime.clone()
    }

    pub fn average(&self) -> Option<f64> {
        self.realtime().average(AverageWindow::Full)
    }

    pub fn median(&self) -> Option<f64> {
        self.realtime().median()
    }

    /// Empty both rolling windows. Lifetime statistics are kept.
    pub fn clear_realtime(&self) {
        self.battery.realtime.clear();
        self.charger.realtime.clear();
    }

    pub fn add_listener(&self, listener: Arc<dyn MeasurementListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MeasurementListener>) -> bool {
        self.listeners.remove(listener)
    }
}

impl ChargerListener for CollectionTask {
    fn on_charger_connected(&self) {
        self.set_charging(true);
    }

    fn on_charger_disconnected(&self) {
        self.set_charging(false);
    }
}

impl fmt::Debug for CollectionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionTask")
            .field("sensor", &self.name())
            .field("interval", &self.interval)
            .field("mode", &self.mode())
            .finish()
    }
}
