use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;

use super::{ChargingMode, CollectionTask};
use crate::{
    persistence::StateStore,
    sensor::SensorReader,
    statistics::{Statistics, StatisticsConfig, StatisticsRecord},
    sync::lock,
    worker::Worker,
};

/// Default time between saves of the lifetime statistics.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// A collection task whose lifetime statistics survive restarts.
///
/// Both lifetime accumulators are loaded from the store on construction and
/// saved on an interval while running, plus once more on stop. Load and save
/// failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct LifetimeCollectionTask {
    task: Arc<CollectionTask>,
    battery: Arc<Statistics>,
    charger: Arc<Statistics>,
    store: StateStore,
    key: String,
    save_interval: Duration,
    saver: Mutex<Option<Worker>>,
}

impl LifetimeCollectionTask {
    pub fn new(
        reader: SensorReader,
        config: StatisticsConfig,
        interval: Duration,
        store: StateStore,
        save_interval: Duration,
    ) -> Self {
        let key = reader.sensor().name().replace(' ', "_");

        let battery = Arc::new(Statistics::new(config, false));
        let charger = Arc::new(Statistics::new(config, true));
        for (mode, stats) in [(ChargingMode::Battery, &battery), (ChargingMode::Charger, &charger)] {
            load_statistics(&store, &record_name(&key, mode), stats);
        }

        let task = CollectionTask::with_lifetime(
            reader,
            config,
            interval,
            battery.clone(),
            charger.clone(),
        );

        Self {
            task: Arc::new(task),
            battery,
            charger,
            store,
            key,
            save_interval: save_interval.max(Duration::from_millis(1)),
            saver: Mutex::new(None),
        }
    }

    /// The underlying sampling task.
    pub fn task(&self) -> &Arc<CollectionTask> {
        &self.task
    }

    pub fn lifetime_for(&self, mode: ChargingMode) -> Arc<Statistics> {
        match mode {
            ChargingMode::Battery => self.battery.clone(),
            ChargingMode::Charger => self.charger.clone(),
        }
    }

    /// Persist both lifetime accumulators.
    pub fn save(&self) -> Result<()> {
        for mode in [ChargingMode::Battery, ChargingMode::Charger] {
            let record = self.lifetime_for(mode).record();
            self.store.save(&record_name(&self.key, mode), &record)?;
        }
        Ok(())
    }

    /// Zero both lifetime accumulators and persist the empty state.
    pub fn reset(&self) {
        for mode in [ChargingMode::Battery, ChargingMode::Charger] {
            self.lifetime_for(mode).reset();
        }
        if let Err(e) = self.save() {
            log::warn!("couldn't save reset {} statistics: {}", self.key, e);
        }
    }

    pub fn start(&self) {
        self.task.start();

        let mut saver = lock(&self.saver);
        if saver.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let accumulators = [
            (ChargingMode::Battery, self.battery.clone()),
            (ChargingMode::Charger, self.charger.clone()),
        ];
        let store = self.store.clone();
        let key = self.key.clone();
        let save_interval = self.save_interval;
        *saver = Some(Worker::spawn("lifetime saver", move |mut signal| async move {
            while signal.sleep(save_interval).await {
                for (mode, stats) in &accumulators {
                    if let Err(e) = store.save(&record_name(&key, *mode), &stats.record()) {
                        log::warn!("couldn't save {key} {mode} statistics: {e}");
                    }
                }
            }
        }));
    }

    /// Stop sampling and saving, then save once more.
    pub async fn stop(&self) {
        self.task.stop().await;

        let saver = lock(&self.saver).take();
        if let Some(saver) = saver {
            saver.stop().await;
            if let Err(e) = self.save() {
                log::warn!("couldn't save {} statistics on stop: {}", self.key, e);
            }
        }
    }
}

fn record_name(key: &str, mode: ChargingMode) -> String {
    format!("statistics_{key}_{mode}")
}

fn load_statistics(store: &StateStore, name: &str, stats: &Statistics) {
    match store.load::<StatisticsRecord>(name) {
        Ok(record) => {
            if stats.restore(&record) {
                log::info!("loaded {} points of {name} from previous session", record.num_points);
            }
        }
        Err(e) => log::info!("starting fresh {name}: {e}"),
    }
}
