use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use systemstat::{Platform, System};

use crate::{
    sync::{Listeners, lock},
    worker::Worker,
};

/// Receives charging-state changes from the platform.
pub trait ChargerListener: Send + Sync {
    fn on_charger_connected(&self) {}

    fn on_charger_disconnected(&self) {}

    fn on_battery_level_changed(&self, _level: u8) {}
}

/// Last known charging state. `None` until the platform reports.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChargerState {
    pub charging: Option<bool>,
    pub level: Option<u8>,
}

/// Fans charger and battery-level changes out to listeners, delivering only
/// actual transitions.
#[derive(Debug, Default)]
pub struct ChargerEvents {
    state: Mutex<ChargerState>,
    listeners: Listeners<dyn ChargerListener>,
}

impl ChargerEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn ChargerListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChargerListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn state(&self) -> ChargerState {
        *lock(&self.state)
    }

    pub fn is_charging(&self) -> bool {
        self.state().charging.unwrap_or(false)
    }

    pub fn set_charging(&self, charging: bool) {
        let previous = lock(&self.state).charging.replace(charging);
        if previous == Some(charging) {
            return;
        }

        log::info!("charger {}", if charging { "connected" } else { "disconnected" });
        self.listeners.notify(|l| {
            if charging {
                l.on_charger_connected()
            } else {
                l.on_charger_disconnected()
            }
        });
    }

    pub fn set_level(&self, level: u8) {
        let level = level.min(100);
        let previous = lock(&self.state).level.replace(level);
        if previous == Some(level) {
            return;
        }

        log::debug!("battery level changed to {level}%");
        self.listeners.notify(|l| l.on_battery_level_changed(level));
    }
}

/// Polls the platform's power status and feeds [`ChargerEvents`].
#[derive(Debug)]
pub struct SystemChargerMonitor {
    events: Arc<ChargerEvents>,
    poll_interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl SystemChargerMonitor {
    pub fn new(events: Arc<ChargerEvents>, poll_interval: Duration) -> Self {
        Self {
            events,
            poll_interval,
            worker: Mutex::new(None),
        }
    }

    /// Read the platform state once.
    pub fn poll(events: &ChargerEvents) {
        let system = System::new();

        match system.on_ac_power() {
            Ok(ac) => events.set_charging(ac),
            Err(e) => log::debug!("couldn't read ac power state: {}", e),
        }

        match system.battery_life() {
            Ok(battery) => {
                let level = (battery.remaining_capacity * 100.0).round().clamp(0.0, 100.0);
                events.set_level(level as u8);
            }
            Err(e) => log::debug!("couldn't read battery life: {}", e),
        }
    }

    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return;
        }

        let events = self.events.clone();
        let poll_interval = self.poll_interval;
        *worker = Some(Worker::spawn("charger monitor", move |mut signal| async move {
            loop {
                Self::poll(&events);
                if !signal.sleep(poll_interval).await {
                    break;
                }
            }
        }));
    }

    pub async fn stop(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }
}
