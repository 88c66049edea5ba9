//! Velocity-axis deposition of a density field.
//!
//! Every spatial sample adds its density to the one channel whose edges
//! contain its line-of-sight velocity. Samples outside the velocity axis or
//! with an undefined velocity or density are dropped.

use ndarray::{Array3, Array4, Axis, Zip};

use crate::error::AppError;
use crate::math::uniform_step;

/// Channel edges of a uniform velocity axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityBins {
    pub first_edge: f64,
    pub width: f64,
    pub count: usize,
}

impl VelocityBins {
    pub fn new(velocities: &[f64]) -> Result<Self, AppError> {
        let width = uniform_step(velocities, "Velocity")?;
        if width < 0.0 {
            return Err(AppError::config("Velocity axis must be ascending."));
        }
        Ok(Self {
            first_edge: velocities[0] - 0.5 * width,
            width,
            count: velocities.len(),
        })
    }

    pub fn edges(&self) -> Vec<f64> {
        (0..=self.count)
            .map(|i| self.first_edge + i as f64 * self.width)
            .collect()
    }

    /// Channel containing `v`, if any.
    pub fn index(&self, v: f64) -> Option<usize> {
        if !v.is_finite() {
            return None;
        }
        let pos = ((v - self.first_edge) / self.width).floor();
        if pos < 0.0 || pos >= self.count as f64 {
            None
        } else {
            Some(pos as usize)
        }
    }
}

/// Deposit `density` into a `(channel, x, y, z)` cube.
pub fn deposit(density: &Array3<f64>, velocity: &Array3<f64>, bins: &VelocityBins) -> Result<Array4<f64>, AppError> {
    check_shapes(density, velocity)?;
    let (nx, ny, nz) = density.dim();
    let mut cube = Array4::<f64>::zeros((bins.count, nx, ny, nz));
    for ((i, j, k), &rho) in density.indexed_iter() {
        if rho.is_nan() || rho == 0.0 {
            continue;
        }
        if let Some(c) = bins.index(velocity[(i, j, k)]) {
            cube[(c, i, j, k)] += rho;
        }
    }
    Ok(cube)
}

/// Deposit and line-integrate along `z` in one pass.
///
/// Cells flagged in `covered` are skipped; the result is shaped
/// `(channel, x, y)` and equals integrating [`deposit`]'s cube along `z` over
/// the uncovered cells with spacing `dz`.
pub fn deposit_columns(
    density: &Array3<f64>,
    velocity: &Array3<f64>,
    covered: &Array3<bool>,
    bins: &VelocityBins,
    dz: f64,
) -> Result<Array3<f64>, AppError> {
    check_shapes(density, velocity)?;
    if covered.dim() != density.dim() {
        return Err(AppError::internal(format!(
            "Coverage mask shape {:?} does not match field shape {:?}.",
            covered.dim(),
            density.dim()
        )));
    }
    let (nx, ny, _) = density.dim();
    let mut columns = Array3::<f64>::zeros((bins.count, nx, ny));
    Zip::indexed(columns.axis_iter_mut(Axis(1))).par_for_each(|i, mut plane| {
        let rho = density.index_axis(Axis(0), i);
        let vel = velocity.index_axis(Axis(0), i);
        let cov = covered.index_axis(Axis(0), i);
        for ((j, k), &r) in rho.indexed_iter() {
            if r.is_nan() || r == 0.0 || cov[(j, k)] {
                continue;
            }
            if let Some(c) = bins.index(vel[(j, k)]) {
                plane[(c, j)] += r * dz;
            }
        }
    });
    Ok(columns)
}

fn check_shapes(density: &Array3<f64>, velocity: &Array3<f64>) -> Result<(), AppError> {
    if density.dim() != velocity.dim() {
        return Err(AppError::internal(format!(
            "Density shape {:?} does not match velocity shape {:?}.",
            density.dim(),
            velocity.dim()
        )));
    }
    Ok(())
}
