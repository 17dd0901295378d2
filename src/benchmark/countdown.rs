use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Running,
    PausedForCharger,
    Stopped,
}

/// Time left in a benchmark, frozen while a charger is connected.
#[derive(Debug)]
pub struct Countdown {
    clock: Arc<dyn Clock>,
    state: CountdownState,
    /// Remaining time as of `since`.
    remaining: Duration,
    since: Instant,
}

impl Countdown {
    pub fn new(clock: Arc<dyn Clock>, total: Duration) -> Self {
        let since = clock.now();
        Self {
            clock,
            state: CountdownState::Running,
            remaining: total,
            since,
        }
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state == CountdownState::PausedForCharger
    }

    pub fn remaining(&self) -> Duration {
        match self.state {
            CountdownState::Running => self
                .remaining
                .saturating_sub(self.clock.now().saturating_duration_since(self.since)),
            CountdownState::PausedForCharger | CountdownState::Stopped => self.remaining,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Freeze the countdown. Only a running countdown can pause.
    pub fn pause(&mut self) -> bool {
        if self.state != CountdownState::Running {
            return false;
        }
        self.remaining = self.remaining();
        self.state = CountdownState::PausedForCharger;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != CountdownState::PausedForCharger {
            return false;
        }
        self.since = self.clock.now();
        self.state = CountdownState::Running;
        true
    }

    /// Final. A stopped countdown never runs again.
    pub fn stop(&mut self) {
        self.remaining = self.remaining();
        self.state = CountdownState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_counts_down_and_saturates() {
        let clock = Arc::new(ManualClock::new());
        let countdown = Countdown::new(clock.clone(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(4));
        assert_eq!(countdown.remaining(), Duration::from_secs(6));

        clock.advance(Duration::from_secs(20));
        assert_eq!(countdown.remaining(), Duration::ZERO);
        assert!(countdown.is_finished());
    }

    #[test]
    fn test_pause_freezes_remaining() {
        let clock = Arc::new(ManualClock::new());
        let mut countdown = Countdown::new(clock.clone(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(3));
        assert!(countdown.pause());
        assert!(!countdown.pause());
        clock.advance(Duration::from_secs(100));
        assert_eq!(countdown.state(), CountdownState::PausedForCharger);
        assert_eq!(countdown.remaining(), Duration::from_secs(7));

        assert!(countdown.resume());
        clock.advance(Duration::from_secs(2));
        assert_eq!(countdown.remaining(), Duration::from_secs(5));
    }

    #[test]
    fn test_stop_is_final() {
        let clock = Arc::new(ManualClock::new());
        let mut countdown = Countdown::new(clock.clone(), Duration::from_secs(10));

        clock.advance(Duration::from_secs(1));
        countdown.stop();
        assert!(!countdown.pause());
        assert!(!countdown.resume());

        clock.advance(Duration::from_secs(5));
        assert_eq!(countdown.state(), CountdownState::Stopped);
        assert_eq!(countdown.remaining(), Duration::from_secs(9));
    }
}
