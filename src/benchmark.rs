//! Parameter sweeps that fit a power model for one device component.
//!
//! A benchmark steps a [`Parameter`] (screen brightness, synthetic CPU load)
//! through a range of levels, lets the hardware settle at each one, measures
//! power through a [`CollectionTask`] and fits a model to the results.

mod countdown;
mod load;
mod parameter;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use thiserror::Error;

pub use self::{
    countdown::{Countdown, CountdownState},
    load::LoadGenerator,
    parameter::{BacklightParameter, Parameter},
};
use crate::{
    charger::ChargerListener,
    clock::{Clock, SystemClock},
    collection::{ChargingMode, CollectionTask},
    model::{Model, ModelFitError, ModelKind, ModelManager, ModelShape},
    point::Point,
    sensor::MAX_LEVEL,
    sync::{Listeners, lock},
    worker::{StopSignal, Worker},
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchmarkError {
    #[error("benchmark was stopped")]
    Stopped,

    #[error("couldn't set parameter: {0}")]
    Parameter(String),

    #[error(transparent)]
    Fit(#[from] ModelFitError),

    #[error("no power measurements were collected")]
    NoData,
}

/// Progress hooks. Every method defaults to doing nothing.
pub trait BenchmarkListener: Send + Sync {
    /// Time left, reported while settling and measuring.
    fn on_tick(&self, _remaining: Duration) {}

    /// Fraction of levels measured so far.
    fn on_progress(&self, _fraction: f64) {}

    /// A level has been measured.
    fn on_level(&self, _level: f64, _power: f64) {}

    fn on_complete(&self, _result: &Result<Model, BenchmarkError>) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchmarkConfig {
    pub kind: ModelKind,
    pub shape: ModelShape,
    pub start: f64,
    pub end: f64,
    pub step: f64,
    /// Wait after each parameter change before measuring.
    pub settle: Duration,
    /// How long to sample at each level. Zero takes a single sample.
    pub measure: Duration,
    /// Granularity of tick callbacks and charger checks.
    pub tick: Duration,
}

impl BenchmarkConfig {
    pub fn brightness(step: f64, settle: Duration, measure: Duration) -> Self {
        Self {
            kind: ModelKind::Screen,
            shape: ModelShape::Linear,
            start: 0.0,
            end: MAX_LEVEL,
            step,
            settle,
            measure,
            tick: Duration::from_secs(1),
        }
    }

    pub fn cpu_load(step: f64, settle: Duration, measure: Duration) -> Self {
        Self {
            kind: ModelKind::CpuLoad,
            shape: ModelShape::Linear,
            start: 0.0,
            end: 1.0,
            step,
            settle,
            measure,
            tick: Duration::from_secs(1),
        }
    }

    /// `start`, `start + step`, ... up to and including `end`.
    pub fn levels(&self) -> Vec<f64> {
        if !self.step.is_finite() || self.step <= 0.0 || self.end < self.start {
            return vec![self.start];
        }

        let count = ((self.end - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..count).map(|i| self.start + i as f64 * self.step).collect()
    }

    fn total_duration(&self) -> Duration {
        (self.settle + self.measure) * self.levels().len() as u32
    }
}

/// Outcome of measuring one level.
enum LevelOutcome {
    Measured(f64),
    /// A charger was connected mid-level. Measure it again.
    Interrupted,
}

pub struct Benchmark {
    config: BenchmarkConfig,
    parameter: Arc<dyn Parameter>,
    power: Arc<CollectionTask>,
    models: Option<Arc<ModelManager>>,
    clock: Arc<dyn Clock>,
    countdown: Mutex<Option<Countdown>>,
    charger_connected: AtomicBool,
    interrupted: AtomicBool,
    listeners: Listeners<dyn BenchmarkListener>,
    result: Mutex<Option<Result<Model, BenchmarkError>>>,
    worker: Mutex<Option<Worker>>,
}

impl Benchmark {
    pub fn new(
        config: BenchmarkConfig,
        parameter: Arc<dyn Parameter>,
        power: Arc<CollectionTask>,
    ) -> Self {
        Self {
            config,
            parameter,
            power,
            models: None,
            clock: Arc::new(SystemClock),
            countdown: Mutex::new(None),
            charger_connected: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            listeners: Listeners::new(),
            result: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Store a successful fit under the config's model kind.
    pub fn with_models(mut self, models: Arc<ModelManager>) -> Self {
        self.models = Some(models);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn BenchmarkListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BenchmarkListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn countdown_state(&self) -> Option<CountdownState> {
        lock(&self.countdown).as_ref().map(Countdown::state)
    }

    pub fn remaining(&self) -> Option<Duration> {
        lock(&self.countdown).as_ref().map(Countdown::remaining)
    }

    /// The result of the last completed run.
    pub fn result(&self) -> Option<Result<Model, BenchmarkError>> {
        lock(&self.result).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Tell the benchmark whether a charger is connected. Measurements pause
    /// while one is, since charging power hides what is being measured.
    pub fn set_charger_connected(&self, connected: bool) {
        if self.charger_connected.swap(connected, Ordering::SeqCst) == connected {
            return;
        }

        let mut countdown = lock(&self.countdown);
        if connected {
            self.interrupted.store(true, Ordering::SeqCst);
            if let Some(countdown) = countdown.as_mut()
                && countdown.pause()
            {
                log::info!("{} benchmark paused while charging", self.parameter.name());
            }
        } else if let Some(countdown) = countdown.as_mut()
            && countdown.resume()
        {
            log::info!("{} benchmark resumed", self.parameter.name());
        }
    }

    /// Run the sweep in the background. Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let benchmark = self.clone();
        *worker = Some(Worker::spawn("benchmark", move |signal| async move {
            let _ = benchmark.run(signal).await;
        }));
    }

    /// Stop a background run and wait for it. No callbacks fire after this
    /// returns.
    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }

    /// Run the sweep to completion, or until `signal` stops it.
    pub async fn run(&self, mut signal: StopSignal) -> Result<Model, BenchmarkError> {
        let levels = self.config.levels();
        log::info!(
            "starting {} benchmark over {} levels",
            self.parameter.name(),
            levels.len()
        );

        *lock(&self.countdown) = Some({
            let mut countdown = Countdown::new(self.clock.clone(), self.config.total_duration());
            if self.charger_connected.load(Ordering::SeqCst) {
                countdown.pause();
            }
            countdown
        });

        let result = self.sweep(&levels, &mut signal).await;

        if let Err(e) = self.parameter.restore() {
            log::warn!("couldn't restore {}: {}", self.parameter.name(), e);
        }
        if let Some(countdown) = lock(&self.countdown).as_mut() {
            countdown.stop();
        }

        match &result {
            Ok(model) => {
                log::info!("{} benchmark fitted {}", self.parameter.name(), model);
                if let Some(models) = &self.models {
                    models.set(self.config.kind, *model);
                }
            }
            Err(e) => log::warn!("{} benchmark failed: {}", self.parameter.name(), e),
        }

        *lock(&self.result) = Some(result.clone());
        self.listeners.notify(|l| l.on_complete(&result));
        result
    }

    async fn sweep(
        &self,
        levels: &[f64],
        signal: &mut StopSignal,
    ) -> Result<Model, BenchmarkError> {
        let mut points = Vec::with_capacity(levels.len());

        for (i, &level) in levels.iter().enumerate() {
            let power = loop {
                // cleared before the charger check so a connect that lands
                // between the check and the measurement still counts
                self.interrupted.store(false, Ordering::SeqCst);
                self.wait_for_charger(signal).await?;
                match self.measure_level(level, signal).await? {
                    LevelOutcome::Measured(power) => break power,
                    LevelOutcome::Interrupted => {
                        log::debug!("redoing level {level} after charger interruption");
                    }
                }
            };

            log::debug!("{} at {level}: {power:.1} mW", self.parameter.name());
            points.push(Point::new(level, power));
            self.listeners.notify(|l| l.on_level(level, power));

            let progress = (i + 1) as f64 / levels.len() as f64;
            self.listeners.notify(|l| l.on_progress(progress));
        }

        if points.is_empty() {
            return Err(BenchmarkError::NoData);
        }

        Ok(self.config.shape.fit(&points)?)
    }

    async fn wait_for_charger(&self, signal: &mut StopSignal) -> Result<(), BenchmarkError> {
        while self.charger_connected.load(Ordering::SeqCst) {
            if !signal.sleep(self.config.tick).await {
                return Err(BenchmarkError::Stopped);
            }
        }

        if signal.is_stopped() {
            return Err(BenchmarkError::Stopped);
        }
        Ok(())
    }

    async fn measure_level(
        &self,
        level: f64,
        signal: &mut StopSignal,
    ) -> Result<LevelOutcome, BenchmarkError> {
        self.parameter
            .set(level)
            .map_err(|e| BenchmarkError::Parameter(e.to_string()))?;

        self.wait(self.config.settle, signal).await?;

        self.power.clear_realtime();
        self.power.sample_once();
        let samples = sample_count(self.config.measure, self.power.interval());
        for _ in 1..samples {
            self.wait(self.power.interval(), signal).await?;
            self.power.sample_once();
        }

        if self.interrupted.load(Ordering::SeqCst)
            || self.charger_connected.load(Ordering::SeqCst)
        {
            return Ok(LevelOutcome::Interrupted);
        }

        let realtime = self.power.realtime_for(ChargingMode::Battery);
        match realtime.median() {
            Some(power) => Ok(LevelOutcome::Measured(power)),
            None => Err(BenchmarkError::NoData),
        }
    }

    /// Sleep in tick-sized slices, reporting the countdown as it goes.
    async fn wait(&self, duration: Duration, signal: &mut StopSignal) -> Result<(), BenchmarkError> {
        let mut left = duration;
        while !left.is_zero() {
            let slice = left.min(self.config.tick.max(Duration::from_millis(1)));
            if !signal.sleep(slice).await {
                return Err(BenchmarkError::Stopped);
            }
            left -= slice;

            if let Some(remaining) = self.remaining() {
                self.listeners.notify(|l| l.on_tick(remaining));
            }
        }

        if signal.is_stopped() {
            return Err(BenchmarkError::Stopped);
        }
        Ok(())
    }
}

impl ChargerListener for Benchmark {
    fn on_charger_connected(&self) {
        self.set_charger_connected(true);
    }

    fn on_charger_disconnected(&self) {
        self.set_charger_connected(false);
    }
}

impl std::fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Benchmark")
            .field("parameter", &self.parameter.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Samples to take over `measure` at `interval` spacing, at least one.
fn sample_count(measure: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    (measure.as_nanos() / interval.as_nanos()).clamp(1, u32::MAX as u128) as u32
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        charger::ChargerEvents,
        persistence::StateStore,
        sensor::{FnSensor, SensorReader},
        statistics::StatisticsConfig,
        worker::stop_pair,
    };

    /// Records the level it was last set to.
    #[derive(Default)]
    struct FakeParameter {
        level: Mutex<f64>,
        restored: AtomicBool,
    }

    impl Parameter for FakeParameter {
        fn name(&self) -> &str {
            "fake"
        }

        fn set(&self, value: f64) -> anyhow::Result<()> {
            *lock(&self.level) = value;
            Ok(())
        }

        fn restore(&self) -> anyhow::Result<()> {
            self.restored.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingParameter;

    impl Parameter for FailingParameter {
        fn name(&self) -> &str {
            "failing"
        }

        fn set(&self, _value: f64) -> anyhow::Result<()> {
            anyhow::bail!("permission denied")
        }
    }

    /// Connects the charger the first time it is set to `connect_at`, after
    /// the sweep has already checked for one.
    struct ConnectingParameter {
        inner: Arc<FakeParameter>,
        events: Arc<ChargerEvents>,
        connect_at: f64,
        fired: AtomicBool,
        sets: AtomicUsize,
    }

    impl Parameter for ConnectingParameter {
        fn name(&self) -> &str {
            "connecting"
        }

        fn set(&self, value: f64) -> anyhow::Result<()> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(value)?;
            if value == self.connect_at && !self.fired.swap(true, Ordering::SeqCst) {
                self.events.set_charging(true);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        levels: Mutex<Vec<(f64, f64)>>,
        progress: Mutex<Vec<f64>>,
        completed: AtomicUsize,
    }

    impl BenchmarkListener for Recorder {
        fn on_progress(&self, fraction: f64) {
            lock(&self.progress).push(fraction);
        }

        fn on_level(&self, level: f64, power: f64) {
            lock(&self.levels).push((level, power));
        }

        fn on_complete(&self, _result: &Result<Model, BenchmarkError>) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Power readings that follow the fake parameter: `level * 2`.
    fn power_task(parameter: &Arc<FakeParameter>) -> Arc<CollectionTask> {
        let source = parameter.clone();
        let sensor = FnSensor::new("power", move || *lock(&source.level) * 2.0);
        let reader = SensorReader::new(Arc::new(sensor)).with_debounce(Duration::ZERO);
        Arc::new(CollectionTask::new(
            reader,
            StatisticsConfig::default(),
            Duration::from_millis(10),
        ))
    }

    #[test]
    fn test_levels() {
        let config = BenchmarkConfig::brightness(50.0, Duration::ZERO, Duration::ZERO);
        assert_eq!(config.levels(), vec![0.0, 50.0, 100.0, 150.0, 200.0, 250.0]);

        let cpu = BenchmarkConfig::cpu_load(0.25, Duration::ZERO, Duration::ZERO);
        assert_eq!(cpu.levels(), vec![0.0, 0.25, 0.5, 0.75, 1.0]);

        let bad = BenchmarkConfig::cpu_load(0.0, Duration::ZERO, Duration::ZERO);
        assert_eq!(bad.levels(), vec![0.0]);
    }

    #[tokio::test]
    async fn test_brightness_sweep_fits_slope() {
        let dir = tempfile::tempdir().unwrap();
        let models = Arc::new(ModelManager::new(StateStore::new(dir.path())));
        let parameter = Arc::new(FakeParameter::default());
        let power = power_task(&parameter);

        let benchmark = Benchmark::new(
            BenchmarkConfig::brightness(50.0, Duration::ZERO, Duration::ZERO),
            parameter.clone(),
            power,
        )
        .with_models(models.clone());
        let recorder = Arc::new(Recorder::default());
        benchmark.add_listener(recorder.clone());

        let model = benchmark.run(StopSignal::never()).await.unwrap();

        let levels = lock(&recorder.levels).clone();
        assert_eq!(levels.len(), 6);
        assert_eq!(levels[5], (250.0, 500.0));
        match model {
            Model::Linear(linear) => assert!((linear.slope - 2.0).abs() < 1e-9),
            other => panic!("unexpected model {other:?}"),
        }

        assert_eq!(lock(&recorder.progress).last().copied(), Some(1.0));
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        assert!(parameter.restored.load(Ordering::SeqCst));
        assert_eq!(models.get(ModelKind::Screen), Some(model));
        assert_eq!(benchmark.countdown_state(), Some(CountdownState::Stopped));
    }

    #[tokio::test]
    async fn test_measure_window_takes_several_samples() {
        let parameter = Arc::new(FakeParameter::default());
        let power = power_task(&parameter);
        let benchmark = Benchmark::new(
            BenchmarkConfig::cpu_load(0.5, Duration::ZERO, Duration::from_millis(30)),
            parameter,
            power.clone(),
        );

        let model = benchmark.run(StopSignal::never()).await.unwrap();
        assert!((model.predict(1.0) - 2.0).abs() < 1e-9);
        assert_eq!(power.realtime().size(), 3);
    }

    #[tokio::test]
    async fn test_parameter_failure_is_reported() {
        let parameter = Arc::new(FakeParameter::default());
        let benchmark = Benchmark::new(
            BenchmarkConfig::brightness(50.0, Duration::ZERO, Duration::ZERO),
            Arc::new(FailingParameter),
            power_task(&parameter),
        );

        let result = benchmark.run(StopSignal::never()).await;
        assert!(matches!(result, Err(BenchmarkError::Parameter(_))));
        assert_eq!(benchmark.result(), Some(result));
    }

    #[tokio::test]
    async fn test_single_level_cannot_fit() {
        let parameter = Arc::new(FakeParameter::default());
        let mut config = BenchmarkConfig::brightness(50.0, Duration::ZERO, Duration::ZERO);
        config.end = 0.0;
        let benchmark = Benchmark::new(config, parameter.clone(), power_task(&parameter));

        let result = benchmark.run(StopSignal::never()).await;
        assert!(matches!(
            result,
            Err(BenchmarkError::Fit(ModelFitError::InsufficientPoints { .. }))
        ));
    }

    #[tokio::test]
    async fn test_stop_interrupts_settling() {
        let parameter = Arc::new(FakeParameter::default());
        let benchmark = Benchmark::new(
            BenchmarkConfig::brightness(50.0, Duration::from_secs(60), Duration::ZERO),
            parameter.clone(),
            power_task(&parameter),
        );

        let (handle, signal) = stop_pair();
        let run = benchmark.run(signal);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => panic!("sweep finished before stop"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => handle.stop(),
        }

        assert_eq!(run.await, Err(BenchmarkError::Stopped));
        assert!(parameter.restored.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_background_run_stop_is_idempotent() {
        let parameter = Arc::new(FakeParameter::default());
        let benchmark = Arc::new(Benchmark::new(
            BenchmarkConfig::brightness(50.0, Duration::from_secs(60), Duration::ZERO),
            parameter.clone(),
            power_task(&parameter),
        ));
        let recorder = Arc::new(Recorder::default());
        benchmark.add_listener(recorder.clone());

        benchmark.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(benchmark.is_running());

        benchmark.stop().await;
        benchmark.stop().await;
        assert!(!benchmark.is_running());
        assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
        assert_eq!(benchmark.result(), Some(Err(BenchmarkError::Stopped)));
    }

    #[tokio::test]
    async fn test_charger_pauses_and_level_is_redone() {
        let parameter = Arc::new(FakeParameter::default());
        let mut config = BenchmarkConfig::brightness(100.0, Duration::ZERO, Duration::ZERO);
        config.tick = Duration::from_millis(5);
        let benchmark = Arc::new(Benchmark::new(config, parameter.clone(), power_task(&parameter)));

        benchmark.on_charger_connected();
        benchmark.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(benchmark.countdown_state(), Some(CountdownState::PausedForCharger));
        assert!(benchmark.result().is_none());

        benchmark.on_charger_disconnected();
        for _ in 0..100 {
            if benchmark.result().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let model = benchmark.result().unwrap().unwrap();
        assert!((model.predict(100.0) - 200.0).abs() < 1e-9);
        benchmark.stop().await;
    }

    #[tokio::test]
    async fn test_charger_connecting_after_check_redoes_level() {
        let fake = Arc::new(FakeParameter::default());
        let power = power_task(&fake);
        let events = Arc::new(ChargerEvents::new());
        events.add_listener(power.clone());

        let parameter = Arc::new(ConnectingParameter {
            inner: fake.clone(),
            events: events.clone(),
            connect_at: 100.0,
            fired: AtomicBool::new(false),
            sets: AtomicUsize::new(0),
        });
        let mut config = BenchmarkConfig::brightness(100.0, Duration::ZERO, Duration::ZERO);
        config.tick = Duration::from_millis(5);
        let benchmark = Arc::new(Benchmark::new(config, parameter.clone(), power.clone()));
        events.add_listener(benchmark.clone());
        let recorder = Arc::new(Recorder::default());
        benchmark.add_listener(recorder.clone());

        benchmark.start();
        for _ in 0..100 {
            if benchmark.countdown_state() == Some(CountdownState::PausedForCharger) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(benchmark.countdown_state(), Some(CountdownState::PausedForCharger));
        assert!(benchmark.result().is_none());

        events.set_charging(false);
        for _ in 0..100 {
            if benchmark.result().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let model = benchmark.result().unwrap().unwrap();
        assert!((model.predict(100.0) - 200.0).abs() < 1e-9);
        assert_eq!(parameter.sets.load(Ordering::SeqCst), 4);
        let levels: Vec<f64> = lock(&recorder.levels).iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, vec![0.0, 100.0, 200.0]);
        benchmark.stop().await;
    }
}
