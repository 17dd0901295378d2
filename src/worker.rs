use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle};

/// Create a connected stop handle and signal.
pub fn stop_pair() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx }, StopSignal { rx, _owner: None })
}

/// The requesting side of a stop signal.
#[derive(Debug)]
pub struct StopHandle {
    tx: watch::Sender<bool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// The observing side of a stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    // keeps the channel open for signals with no handle
    _owner: Option<Arc<watch::Sender<bool>>>,
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _owner: Some(Arc::new(tx)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested or the handle is dropped.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration` unless stopped first.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the sleep
    /// was cut short by a stop request.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let rx = &mut self.rx;
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = rx.wait_for(|stopped| *stopped) => return false,
        }

        !self.is_stopped()
    }
}

/// A spawned background task together with the handle that stops it.
#[derive(Debug)]
pub struct Worker {
    name: &'static str,
    stop: StopHandle,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn `make(signal)` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, signal) = stop_pair();
        let handle = tokio::spawn(make(signal));
        log::debug!("started {name} worker");

        Self { name, stop, handle }
    }

    /// Request a stop and wait for the task to finish.
    pub async fn stop(self) {
        self.stop.stop();
        if let Err(e) = self.handle.await {
            log::error!("{} worker ended abnormally: {}", self.name, e);
        } else {
            log::debug!("stopped {} worker", self.name);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[tokio::test]
    async fn test_sleep_is_cut_short_by_stop() {
        let (handle, mut signal) = stop_pair();

        let started = Instant::now();
        let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.stop();

        let completed = sleeper.await.unwrap();
        assert!(!completed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_sleep_completes() {
        let mut signal = StopSignal::never();
        assert!(signal.sleep(Duration::ZERO).await);
        assert!(signal.sleep(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_worker_stop_joins() {
        let worker = Worker::spawn("test", |mut signal| async move {
            signal.stopped().await;
        });
        assert!(!worker.is_finished());
        worker.stop().await;
    }
}
