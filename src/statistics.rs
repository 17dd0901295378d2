mod histogram;
mod realtime;

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub use self::{
    histogram::{FINITE_BUCKETS, HISTOGRAM_MAX, HISTOGRAM_MIN, Histogram, NUM_BUCKETS},
    realtime::{AverageWindow, RealtimeSnapshot, RealtimeStatistics},
};
use crate::{
    point::{HistogramPoint, Point},
    sync::lock,
};

/// Serialization format version for lifetime statistics.
pub const STATISTICS_VERSION: u32 = 1;

/// Tuning for rolling and lifetime statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Maximum number of points in a rolling window.
    pub window_size: usize,
    /// Points a rolling window needs before it is trusted on its own.
    pub valid_points: usize,
    /// Points used for the short recent average.
    pub recent_points: usize,
    /// Fraction of points dropped from each tail before taking the median.
    pub spike_fraction: f64,
    /// Lifetime sample count at which lifetime weight saturates.
    pub lifetime_weight_threshold: f64,
    /// Saturated weight of lifetime statistics.
    pub lifetime_max_weight: f64,
    /// Weight of a full rolling window.
    pub realtime_max_weight: f64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            valid_points: 10,
            recent_points: 10,
            spike_fraction: 0.1,
            lifetime_weight_threshold: 100.0,
            lifetime_max_weight: 1.0,
            realtime_max_weight: 0.25,
        }
    }
}

/// Map a raw reading onto the positive-power convention.
///
/// Raw power is positive while discharging and negative while charging, so
/// charger statistics negate readings to store charging power as a positive
/// magnitude.
pub fn convert_value(charger: bool, raw: f64) -> f64 {
    if charger { -raw } else { raw }
}

/// Persisted form of a lifetime accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub version: u32,
    pub charger: bool,
    pub total: f64,
    pub num_points: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub histogram: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Accumulator {
    total: f64,
    num_points: f64,
    min: Option<f64>,
    max: Option<f64>,
    histogram: Histogram,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            total: 0.0,
            num_points: 0.0,
            min: None,
            max: None,
            histogram: Histogram::new(),
        }
    }
}

/// Unbounded statistics over every point seen since the last reset.
#[derive(Debug)]
pub struct Statistics {
    charger: bool,
    config: StatisticsConfig,
    inner: Mutex<Accumulator>,
}

impl Statistics {
    pub fn new(config: StatisticsConfig, charger: bool) -> Self {
        Self {
            charger,
            config,
            inner: Mutex::new(Accumulator::new()),
        }
    }

    pub fn is_charger_statistics(&self) -> bool {
        self.charger
    }

    pub fn convert_value(&self, raw: f64) -> f64 {
        convert_value(self.charger, raw)
    }

    /// Add a raw point. Returns the point as stored, after sign conversion.
    pub fn add_point(&self, point: Point) -> Point {
        let value = self.convert_value(point.y);
        let mut inner = lock(&self.inner);

        inner.total += value;
        inner.num_points += 1.0;
        inner.min = Some(inner.min.map_or(value, |m| m.min(value)));
        inner.max = Some(inner.max.map_or(value, |m| m.max(value)));
        inner.histogram.increment(value);

        point.with_value(value)
    }

    /// Mean of every point, or `None` before the first point.
    pub fn average(&self) -> Option<f64> {
        let inner = lock(&self.inner);
        (inner.num_points > 0.0).then(|| inner.total / inner.num_points)
    }

    pub fn total(&self) -> f64 {
        lock(&self.inner).total
    }

    pub fn num_points(&self) -> f64 {
        lock(&self.inner).num_points
    }

    pub fn min(&self) -> Option<f64> {
        lock(&self.inner).min
    }

    pub fn max(&self) -> Option<f64> {
        lock(&self.inner).max
    }

    /// Trust in lifetime data: a linear ramp from 0 to the configured maximum
    /// as the sample count approaches the threshold.
    pub fn weight(&self) -> f64 {
        let num_points = self.num_points();
        let threshold = self.config.lifetime_weight_threshold;
        let fill = if threshold > 0.0 {
            (num_points / threshold).min(1.0)
        } else {
            1.0
        };

        self.config.lifetime_max_weight.clamp(0.0, 1.0) * fill
    }

    pub fn counterweight(&self) -> f64 {
        1.0 - self.weight()
    }

    pub fn histogram_data(&self) -> Vec<HistogramPoint> {
        lock(&self.inner).histogram.buckets().to_vec()
    }

    /// Forget everything.
    pub fn reset(&self) {
        *lock(&self.inner) = Accumulator::new();
    }

    pub fn record(&self) -> StatisticsRecord {
        let inner = lock(&self.inner);
        StatisticsRecord {
            version: STATISTICS_VERSION,
            charger: self.charger,
            total: inner.total,
            num_points: inner.num_points,
            min: inner.min,
            max: inner.max,
            histogram: inner.histogram.counts(),
        }
    }

    /// Replace the accumulated state with a persisted record.
    ///
    /// Returns `false` and leaves the statistics untouched if the record is
    /// from another format version, another charging mode, or inconsistent.
    pub fn restore(&self, record: &StatisticsRecord) -> bool {
        if record.version != STATISTICS_VERSION {
            log::info!(
                "statistics record version mismatch (got {}, want {}), starting fresh",
                record.version,
                STATISTICS_VERSION
            );
            return false;
        }
        if record.charger != self.charger {
            log::warn!("statistics record is for the other charging mode");
            return false;
        }
        if !record.total.is_finite() || !record.num_points.is_finite() || record.num_points < 0.0
        {
            log::warn!(
                "invalid statistics totals: total={}, num_points={}",
                record.total,
                record.num_points
            );
            return false;
        }
        let Some(histogram) = Histogram::from_counts(&record.histogram) else {
            log::warn!(
                "invalid statistics histogram: expected {NUM_BUCKETS} buckets, got {}",
                record.histogram.len()
            );
            return false;
        };

        *lock(&self.inner) = Accumulator {
            total: record.total,
            num_points: record.num_points,
            min: record.min,
            max: record.max,
            histogram,
        };
        true
    }
}
