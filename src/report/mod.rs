//! Reporting utilities: residual statistics and formatted terminal output.

pub mod format;

pub use format::*;

use ndarray::Array2;

use crate::domain::CutAxis;
use crate::error::AppError;

/// Summary of `observed - model` over the defined pixels of one cut.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidualStats {
    pub axis: CutAxis,
    pub count: usize,
    pub rms: f64,
    /// Mean of `(residual / sigma)²`.
    pub reduced_chi2: f64,
}

/// Pixel-wise residual; undefined where either input is undefined.
pub fn residual_map(observed: &Array2<f64>, model: &Array2<f64>) -> Result<Array2<f64>, AppError> {
    if observed.dim() != model.dim() {
        return Err(AppError::internal(format!(
            "Observed shape {:?} does not match model shape {:?}.",
            observed.dim(),
            model.dim()
        )));
    }
    Ok(observed - model)
}

pub fn residual_stats(axis: CutAxis, residual: &Array2<f64>, sigma: f64) -> ResidualStats {
    let defined: Vec<f64> = residual.iter().copied().filter(|r| r.is_finite()).collect();
    let count = defined.len();
    if count == 0 {
        return ResidualStats {
            axis,
            count,
            rms: f64::NAN,
            reduced_chi2: f64::NAN,
        };
    }
    let mean_sq = defined.iter().map(|r| r * r).sum::<f64>() / count as f64;
    ResidualStats {
        axis,
        count,
        rms: mean_sq.sqrt(),
        reduced_chi2: mean_sq / (sigma * sigma),
    }
}
