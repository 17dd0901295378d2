use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A single sample: `x` is usually a timestamp in milliseconds, `y` the
/// measured value.
///
/// Points order by `|y|`. Ties (including NaN, which sorts after every
/// finite magnitude) are broken on the raw bit patterns of `y` and then `x`
/// so sorting is deterministic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// A point stamped with the current wall-clock time in milliseconds.
    pub fn now(value: f64) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis() as f64, value)
    }

    pub fn timestamp(&self) -> f64 {
        self.x
    }

    pub fn value(&self) -> f64 {
        self.y
    }

    /// The same sample with a different value.
    pub fn with_value(self, value: f64) -> Self {
        Self::new(self.x, value)
    }
}

impl Ord for Point {
    fn cmp(&self, other: &Self) -> Ordering {
        self.y
            .abs()
            .total_cmp(&other.y.abs())
            .then_with(|| self.y.to_bits().cmp(&other.y.to_bits()))
            .then_with(|| self.x.to_bits().cmp(&other.x.to_bits()))
    }
}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Point {}

/// One histogram bucket covering `[min_x, max_x)`. `y` holds the bucket
/// count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramPoint {
    pub x: f64,
    pub y: f64,
    pub min_x: f64,
    pub max_x: f64,
}

impl HistogramPoint {
    pub fn new(min_x: f64, max_x: f64) -> Self {
        Self {
            x: min_x,
            y: 0.0,
            min_x,
            max_x,
        }
    }

    pub fn count(&self) -> f64 {
        self.y
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min_x && value < self.max_x
    }
}
