use serde::{Deserialize, Serialize};

use super::{ModelFitError, check_points};
use crate::point::Point;

/// Ordinary least squares line.
///
/// `predict` uses the slope alone: the model describes the marginal cost of
/// the parameter, and base power is estimated elsewhere. The intercept is
/// kept for callers that want the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearModel {
    pub fn fit(points: &[Point]) -> Result<Self, ModelFitError> {
        check_points(points, 2)?;

        let n = points.len() as f64;
        let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
        let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut sum_x2 = 0.0;
        for p in points {
            let dx = p.x - mean_x;
            sxx += dx * dx;
            sxy += dx * (p.y - mean_y);
            sum_x2 += p.x * p.x;
        }

        // spread relative to magnitude, so tiny and huge x scales both fit
        if sxx <= f64::EPSILON * sum_x2 {
            return Err(ModelFitError::Degenerate("all x values are identical".into()));
        }

        let slope = sxy / sxx;
        Ok(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x
    }
}

/// Least squares line forced through the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearModelAtOrigin {
    pub slope: f64,
}

impl LinearModelAtOrigin {
    pub fn fit(points: &[Point]) -> Result<Self, ModelFitError> {
        check_points(points, 1)?;

        let sxx: f64 = points.iter().map(|p| p.x * p.x).sum();
        if sxx == 0.0 {
            return Err(ModelFitError::Degenerate("all x values are zero".into()));
        }
        let sxy: f64 = points.iter().map(|p| p.x * p.y).sum();

        Ok(Self { slope: sxy / sxx })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x
    }
}
