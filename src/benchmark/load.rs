use std::{
    hint,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

use super::Parameter;
use crate::sync::lock;

/// Length of one busy/idle cycle.
const DUTY_PERIOD: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Shared {
    /// Busy fraction as `f64` bits.
    duty: AtomicU64,
    stop: AtomicBool,
}

impl Shared {
    fn duty(&self) -> f64 {
        f64::from_bits(self.duty.load(Ordering::Relaxed))
    }
}

/// Synthetic CPU load: one thread per core, each busy for a fraction of
/// every cycle.
///
/// Threads start on the first `set` and run until `restore`, `stop` or drop.
#[derive(Debug)]
pub struct LoadGenerator {
    cores: usize,
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl LoadGenerator {
    pub fn new(cores: usize) -> Self {
        Self {
            cores: cores.max(1),
            shared: Arc::new(Shared {
                duty: AtomicU64::new(0.0_f64.to_bits()),
                stop: AtomicBool::new(false),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// One thread per available core.
    pub fn for_all_cores() -> Self {
        Self::new(thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn duty(&self) -> f64 {
        self.shared.duty()
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.threads).is_empty()
    }

    fn spawn_threads(&self) -> Result<()> {
        let mut threads = lock(&self.threads);
        if !threads.is_empty() {
            return Ok(());
        }

        self.shared.stop.store(false, Ordering::SeqCst);
        for core in 0..self.cores {
            let shared = self.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("load-{core}"))
                .spawn(move || burn(&shared))
                .context("couldn't spawn load thread")?;
            threads.push(handle);
        }

        log::debug!("started {} load threads", self.cores);
        Ok(())
    }

    /// Stop and join every load thread.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let threads = std::mem::take(&mut *lock(&self.threads));
        for handle in threads {
            if handle.join().is_err() {
                log::warn!("load thread panicked");
            }
        }
    }
}

impl Parameter for LoadGenerator {
    fn name(&self) -> &str {
        "cpu load"
    }

    /// Set the busy fraction, `0.0..=1.0`.
    fn set(&self, value: f64) -> Result<()> {
        let duty = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        self.shared.duty.store(duty.to_bits(), Ordering::Relaxed);
        self.spawn_threads()
    }

    fn restore(&self) -> Result<()> {
        self.stop();
        self.shared.duty.store(0.0_f64.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for LoadGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn burn(shared: &Shared) {
    while !shared.stop.load(Ordering::Relaxed) {
        let busy = DUTY_PERIOD.mul_f64(shared.duty());
        let start = Instant::now();
        while start.elapsed() < busy {
            hint::spin_loop();
        }

        let idle = DUTY_PERIOD.saturating_sub(busy);
        if !idle.is_zero() {
            thread::sleep(idle);
        }
    }
}
