use crate::point::HistogramPoint;

/// Lower edge of the first bucket (mW).
pub const HISTOGRAM_MIN: f64 = 0.0;

/// Lower edge of the overflow bucket (mW).
pub const HISTOGRAM_MAX: f64 = 9000.0;

/// Buckets of equal width between `HISTOGRAM_MIN` and `HISTOGRAM_MAX`.
pub const FINITE_BUCKETS: usize = 9;

/// Finite buckets plus the overflow bucket.
pub const NUM_BUCKETS: usize = FINITE_BUCKETS + 1;

const BUCKET_WIDTH: f64 = (HISTOGRAM_MAX - HISTOGRAM_MIN) / FINITE_BUCKETS as f64;

/// Fixed-range power histogram.
///
/// Values below `HISTOGRAM_MIN` (and NaN) land in the first bucket, values
/// at or above `HISTOGRAM_MAX` in the overflow bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    buckets: Vec<HistogramPoint>,
}

impl Histogram {
    pub fn new() -> Self {
        let mut buckets: Vec<HistogramPoint> = (0..FINITE_BUCKETS)
            .map(|i| {
                let min = HISTOGRAM_MIN + i as f64 * BUCKET_WIDTH;
                HistogramPoint::new(min, min + BUCKET_WIDTH)
            })
            .collect();
        buckets.push(HistogramPoint::new(HISTOGRAM_MAX, f64::INFINITY));

        Self { buckets }
    }

    /// Rebuild a histogram from persisted bucket counts.
    pub fn from_counts(counts: &[f64]) -> Option<Self> {
        if counts.len() != NUM_BUCKETS || counts.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return None;
        }

        let mut histogram = Self::new();
        for (bucket, count) in histogram.buckets.iter_mut().zip(counts) {
            bucket.y = *count;
        }
        Some(histogram)
    }

    /// Index of the bucket a value belongs to.
    pub fn bucket_index(value: f64) -> usize {
        if value.is_nan() || value < HISTOGRAM_MIN {
            0
        } else if value >= HISTOGRAM_MAX {
            FINITE_BUCKETS
        } else {
            (((value - HISTOGRAM_MIN) / BUCKET_WIDTH) as usize).min(FINITE_BUCKETS - 1)
        }
    }

    pub fn increment(&mut self, value: f64) -> usize {
        let index = Self::bucket_index(value);
        self.buckets[index].y += 1.0;
        index
    }

    pub fn decrement(&mut self, value: f64) -> usize {
        let index = Self::bucket_index(value);
        let bucket = &mut self.buckets[index];
        debug_assert!(bucket.y >= 1.0, "decrementing empty bucket {index}");
        bucket.y = (bucket.y - 1.0).max(0.0);
        index
    }

    pub fn buckets(&self) -> &[HistogramPoint] {
        &self.buckets
    }

    pub fn counts(&self) -> Vec<f64> {
        self.buckets.iter().map(HistogramPoint::count).collect()
    }

    /// Sum of all bucket counts.
    pub fn total(&self) -> f64 {
        self.buckets.iter().map(HistogramPoint::count).sum()
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.y = 0.0;
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}
