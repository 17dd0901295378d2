use std::{
    collections::VecDeque,
    sync::{Mutex, Weak},
};

use super::{Histogram, Statistics, StatisticsConfig, convert_value};
use crate::{
    point::{HistogramPoint, Point},
    sync::lock,
};

/// Which part of the rolling window an average covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AverageWindow {
    /// Every point in the window.
    Full,
    /// Only the most recent `recent_points` points.
    Recent,
}

#[derive(Debug)]
struct Window {
    points: VecDeque<Point>,
    histogram: Histogram,
    median: Option<f64>,
    median_dirty: bool,
    full_average: Option<f64>,
    recent_average: Option<f64>,
    average_dirty: bool,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity + 1),
            histogram: Histogram::new(),
            median: None,
            median_dirty: false,
            full_average: None,
            recent_average: None,
            average_dirty: false,
        }
    }

    fn invalidate(&mut self) {
        self.median_dirty = true;
        self.average_dirty = true;
    }

    fn refresh_averages(&mut self, recent_points: usize) {
        if !self.average_dirty {
            return;
        }

        self.full_average = mean(self.points.iter());
        let skip = self.points.len().saturating_sub(recent_points.max(1));
        self.recent_average = mean(self.points.iter().skip(skip));
        self.average_dirty = false;
    }

    fn refresh_median(&mut self, spike_fraction: f64) {
        if !self.median_dirty {
            return;
        }

        self.median = trimmed_median(self.points.iter().copied().collect(), spike_fraction);
        self.median_dirty = false;
    }
}

fn mean<'a>(points: impl Iterator<Item = &'a Point>) -> Option<f64> {
    let (sum, count) = points.fold((0.0, 0usize), |(sum, count), p| (sum + p.y, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Median after dropping `spike_fraction` of the points from each end of the
/// magnitude-sorted window.
fn trimmed_median(mut points: Vec<Point>, spike_fraction: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    points.sort();

    let len = points.len();
    let mut trim = (len as f64 * spike_fraction.clamp(0.0, 0.5)) as usize;
    if 2 * trim >= len {
        trim = (len - 1) / 2;
    }
    let kept = &points[trim..len - trim];

    Some(kept[kept.len() / 2].y)
}

/// Values read together from a [`RealtimeStatistics`] window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RealtimeSnapshot {
    pub average: Option<f64>,
    pub weight: f64,
    pub counterweight: f64,
}

/// Statistics over a bounded window of the most recent points.
///
/// Until the window holds `valid_points` points, battery-mode averages defer
/// to the attached lifetime statistics.
#[derive(Debug)]
pub struct RealtimeStatistics {
    charger: bool,
    config: StatisticsConfig,
    lifetime: Mutex<Weak<Statistics>>,
    inner: Mutex<Window>,
}

impl RealtimeStatistics {
    pub fn new(config: StatisticsConfig, charger: bool) -> Self {
        Self {
            charger,
            config,
            lifetime: Mutex::new(Weak::new()),
            inner: Mutex::new(Window::new(config.window_size)),
        }
    }

    /// Attach the lifetime statistics used while the window is under-filled.
    pub fn with_lifetime(self, lifetime: Weak<Statistics>) -> Self {
        *lock(&self.lifetime) = lifetime;
        self
    }

    pub fn set_lifetime(&self, lifetime: Weak<Statistics>) {
        *lock(&self.lifetime) = lifetime;
    }

    pub fn is_charger_statistics(&self) -> bool {
        self.charger
    }

    pub fn convert_value(&self, raw: f64) -> f64 {
        convert_value(self.charger, raw)
    }

    pub fn max_size(&self) -> usize {
        self.config.window_size
    }

    /// Add a raw point, evicting the oldest one if the window is full.
    /// Returns the point as stored, after sign conversion.
    pub fn add_point(&self, point: Point) -> Point {
        let stored = point.with_value(self.convert_value(point.y));
        let mut window = lock(&self.inner);

        window.points.push_back(stored);
        window.histogram.increment(stored.y);

        while window.points.len() > self.config.window_size.max(1) {
            if let Some(evicted) = window.points.pop_front() {
                window.histogram.decrement(evicted.y);
            }
        }

        window.invalidate();
        stored
    }

    pub fn size(&self) -> usize {
        lock(&self.inner).points.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).points.is_empty()
    }

    /// Window contents, oldest first.
    pub fn points(&self) -> Vec<Point> {
        lock(&self.inner).points.iter().copied().collect()
    }

    pub fn clear(&self) {
        *lock(&self.inner) = Window::new(self.config.window_size);
    }

    /// Spike-suppressed median of the window.
    pub fn median(&self) -> Option<f64> {
        let mut window = lock(&self.inner);
        window.refresh_median(self.config.spike_fraction);
        window.median
    }

    /// Average of the window.
    ///
    /// Battery-mode statistics with fewer than `valid_points` points report
    /// the lifetime average when one exists. Charger statistics always use
    /// the recent average since charging power moves faster than history.
    pub fn average(&self, span: AverageWindow) -> Option<f64> {
        self.snapshot(span).average
    }

    /// Average, weight and counterweight taken from one view of the window.
    pub fn snapshot(&self, span: AverageWindow) -> RealtimeSnapshot {
        let (size, own) = {
            let mut window = lock(&self.inner);
            window.refresh_averages(self.config.recent_points);

            let own = match (self.charger, span) {
                (true, _) | (false, AverageWindow::Recent) => window.recent_average,
                (false, AverageWindow::Full) => window.full_average,
            };
            (window.points.len(), own)
        };

        let weight = self.weight_for(size);
        let mut average = own;
        if !self.charger && size < self.config.valid_points {
            let lifetime = lock(&self.lifetime).upgrade();
            if let Some(lifetime) = lifetime.and_then(|l| l.average()) {
                average = Some(lifetime);
            }
        }

        RealtimeSnapshot {
            average,
            weight,
            counterweight: 1.0 - weight,
        }
    }

    /// Trust in the window: zero until `valid_points` is reached, then
    /// proportional to how full the window is, capped at
    /// `realtime_max_weight`.
    pub fn weight(&self) -> f64 {
        self.weight_for(self.size())
    }

    pub fn counterweight(&self) -> f64 {
        1.0 - self.weight()
    }

    fn weight_for(&self, size: usize) -> f64 {
        if size == 0 || size < self.config.valid_points {
            return 0.0;
        }

        let fill = (size as f64 / self.config.window_size.max(1) as f64).min(1.0);
        self.config.realtime_max_weight.clamp(0.0, 1.0) * fill
    }

    /// Bucket counts for the current window contents only.
    pub fn histogram_data(&self) -> Vec<HistogramPoint> {
        lock(&self.inner).histogram.buckets().to_vec()
    }
}
