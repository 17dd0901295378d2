//! Regression models relating a controllable parameter to power draw.

mod linear;
mod manager;
mod quadratic;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
    linear::{LinearModel, LinearModelAtOrigin},
    manager::{MODEL_VERSION, ModelListener, ModelManager, ModelRecord},
    quadratic::QuadraticModel,
};
use crate::point::Point;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelFitError {
    #[error("need at least {required} points to fit, got {actual}")]
    InsufficientPoints { required: usize, actual: usize },

    #[error("training data contains a non-finite value")]
    NonFinite,

    #[error("degenerate training data: {0}")]
    Degenerate(String),

    #[error("normal equations are singular")]
    Singular,
}

/// A fitted model, tagged by shape when serialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Model {
    Linear(LinearModel),
    LinearAtOrigin(LinearModelAtOrigin),
    Quadratic(QuadraticModel),
}

impl Model {
    pub fn predict(&self, x: f64) -> f64 {
        match self {
            Self::Linear(m) => m.predict(x),
            Self::LinearAtOrigin(m) => m.predict(x),
            Self::Quadratic(m) => m.predict(x),
        }
    }

    /// Constant term, where the shape has one.
    pub fn intercept(&self) -> Option<f64> {
        match self {
            Self::Linear(m) => Some(m.intercept),
            Self::LinearAtOrigin(_) => None,
            Self::Quadratic(m) => Some(m.c),
        }
    }

    /// Coefficients from the highest power down.
    pub fn coefficients(&self) -> Vec<f64> {
        match self {
            Self::Linear(m) => vec![m.slope, m.intercept],
            Self::LinearAtOrigin(m) => vec![m.slope],
            Self::Quadratic(m) => vec![m.a, m.b, m.c],
        }
    }

    pub fn shape(&self) -> ModelShape {
        match self {
            Self::Linear(_) => ModelShape::Linear,
            Self::LinearAtOrigin(_) => ModelShape::LinearAtOrigin,
            Self::Quadratic(_) => ModelShape::Quadratic,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear(m) => write!(f, "{:.4}x + {:.2}", m.slope, m.intercept),
            Self::LinearAtOrigin(m) => write!(f, "{:.4}x", m.slope),
            Self::Quadratic(m) => write!(f, "{:.6}x² + {:.4}x + {:.2}", m.a, m.b, m.c),
        }
    }
}

/// Which kind of model a fit should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelShape {
    Linear,
    LinearAtOrigin,
    Quadratic,
}

impl ModelShape {
    pub fn fit(self, points: &[Point]) -> Result<Model, ModelFitError> {
        match self {
            Self::Linear => LinearModel::fit(points).map(Model::Linear),
            Self::LinearAtOrigin => LinearModelAtOrigin::fit(points).map(Model::LinearAtOrigin),
            Self::Quadratic => QuadraticModel::fit(points).map(Model::Quadratic),
        }
    }
}

/// The power components a model can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Screen,
    CpuLoad,
    CpuFrequency,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [Self::Screen, Self::CpuLoad, Self::CpuFrequency];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::CpuLoad => "cpu_load",
            Self::CpuFrequency => "cpu_frequency",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject empty, short or non-finite training data.
fn check_points(points: &[Point], required: usize) -> Result<(), ModelFitError> {
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ModelFitError::NonFinite);
    }
    if points.len() < required {
        return Err(ModelFitError::InsufficientPoints {
            required,
            actual: points.len(),
        });
    }
    Ok(())
}
