use serde::{Deserialize, Serialize};

use super::{ModelFitError, check_points};
use crate::point::Point;

/// Relative size below which a pivot counts as zero.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Least squares parabola `a·x² + b·x + c`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuadraticModel {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl QuadraticModel {
    pub fn fit(points: &[Point]) -> Result<Self, ModelFitError> {
        check_points(points, 3)?;

        let mut xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        xs.sort_by(f64::total_cmp);
        xs.dedup();
        if xs.len() < 3 {
            return Err(ModelFitError::Degenerate(format!(
                "need 3 distinct x values, got {}",
                xs.len()
            )));
        }

        // power sums of x, and of x^k·y
        let mut sx = [0.0; 5];
        let mut sxy = [0.0; 3];
        for p in points {
            let mut xk = 1.0;
            for (k, s) in sx.iter_mut().enumerate() {
                *s += xk;
                if k < 3 {
                    sxy[k] += xk * p.y;
                }
                xk *= p.x;
            }
        }

        let augmented = vec![
            vec![sx[4], sx[3], sx[2], sxy[2]],
            vec![sx[3], sx[2], sx[1], sxy[1]],
            vec![sx[2], sx[1], sx[0], sxy[0]],
        ];
        let solution = solve(augmented)?;

        let model = Self {
            a: solution[0],
            b: solution[1],
            c: solution[2],
        };
        if !model.a.is_finite() || !model.b.is_finite() || !model.c.is_finite() {
            return Err(ModelFitError::Singular);
        }

        Ok(model)
    }

    pub fn predict(&self, x: f64) -> f64 {
        (self.a * x + self.b) * x + self.c
    }
}

/// Solve a square system given as augmented rows `[coefficients.., rhs]`.
pub(crate) fn solve(mut rows: Vec<Vec<f64>>) -> Result<Vec<f64>, ModelFitError> {
    let n = rows.len();
    if rows.iter().any(|row| row.len() != n + 1) {
        return Err(ModelFitError::Degenerate("system is not square".into()));
    }

    let scale = rows
        .iter()
        .flat_map(|row| row[..n].iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return Err(ModelFitError::Singular);
    }

    reduce(&mut rows, 0, scale * PIVOT_TOLERANCE)?;

    // back substitution
    let mut solution = vec![0.0; n];
    for i in (0..n).rev() {
        let tail: f64 = (i + 1..n).map(|j| rows[i][j] * solution[j]).sum();
        solution[i] = (rows[i][n] - tail) / rows[i][i];
    }

    Ok(solution)
}

/// Bring `rows` to upper-triangular form from column `col` on.
fn reduce(rows: &mut [Vec<f64>], col: usize, tolerance: f64) -> Result<(), ModelFitError> {
    let Some((first, rest)) = rows.split_first_mut() else {
        return Ok(());
    };

    if first[col].abs() <= tolerance {
        let Some(swap) = rest.iter_mut().find(|row| row[col].abs() > tolerance) else {
            return Err(ModelFitError::Singular);
        };
        std::mem::swap(first, swap);
    }

    for row in rest.iter_mut() {
        let factor = row[col] / first[col];
        if factor == 0.0 {
            continue;
        }
        for (target, pivot) in row[col..].iter_mut().zip(&first[col..]) {
            *target -= factor * pivot;
        }
    }

    reduce(rest, col + 1, tolerance)
}
