//! Evenly spaced coordinate axes.
//!
//! Every grid in this crate is built from uniform 1D axes (offsets, line of
//! sight, velocity). These helpers create and validate them so the rest of
//! the pipeline can assume a constant, positive step.

use crate::error::AppError;

/// Relative tolerance when checking that an axis is uniformly spaced.
const STEP_RTOL: f64 = 1e-6;

/// Symmetric axis `[-m·step, ..., 0, ..., m·step]` covering at least `half_width`.
pub fn centered_axis(half_width: f64, step: f64) -> Result<Vec<f64>, AppError> {
    if !(half_width.is_finite() && step.is_finite() && half_width >= 0.0 && step > 0.0) {
        return Err(AppError::config(format!(
            "Invalid centered axis: half_width={half_width}, step={step}."
        )));
    }
    let m = (half_width / step).round() as i64;
    Ok((-m..=m).map(|i| i as f64 * step).collect())
}

/// Return the constant step of `values`, or a configuration error.
pub fn uniform_step(values: &[f64], label: &str) -> Result<f64, AppError> {
    if values.len() < 2 {
        return Err(AppError::config(format!(
            "{label} axis must have at least 2 samples, got {}.",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AppError::config(format!("{label} axis contains non-finite values.")));
    }
    let step = values[1] - values[0];
    if step == 0.0 {
        return Err(AppError::config(format!("{label} axis has zero spacing.")));
    }
    for w in values.windows(2) {
        let d = w[1] - w[0];
        if (d - step).abs() > STEP_RTOL * step.abs() {
            return Err(AppError::config(format!(
                "{label} axis is not uniformly spaced (step {step} vs {d})."
            )));
        }
    }
    Ok(step)
}

/// Split every pixel of a uniform axis into `n` sub-pixels (centers).
pub fn subdivide(values: &[f64], n: usize) -> Result<Vec<f64>, AppError> {
    if n == 0 {
        return Err(AppError::config("Sub-pixel factor must be >= 1."));
    }
    let step = uniform_step(values, "Sub-pixel")?;
    if n == 1 {
        return Ok(values.to_vec());
    }
    let sub = step / n as f64;
    let first_edge = values[0] - 0.5 * step;
    Ok((0..values.len() * n)
        .map(|i| first_edge + (i as f64 + 0.5) * sub)
        .collect())
}

/// Index of the sample closest to `value`.
pub fn nearest_index(values: &[f64], value: f64) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| {
            (a.1 - value)
                .abs()
                .partial_cmp(&(b.1 - value).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}
