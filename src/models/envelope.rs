//! Rotating-infall envelope kinematics (dimensionless).
//!
//! Radii are in units of the centrifugal radius and velocities in units of the
//! Keplerian speed there (see [`velocity_unit`]). For a sample with streamline
//! parameter μ₀ and `mm = μ / μ₀`:
//!
//! ```text
//! v_r = -√(1 + mm) / √r
//! v_θ = sgn(cos θ) √(1 + mm) (μ₀ - μ) / sin θ / √r
//! v_φ = √(1 - mm) / √r
//! ρ   = r^(-3/2) / √(1 + mm) / (2 μ₀² / r + mm)
//! ```

use rayon::prelude::*;

use crate::domain::CutAxis;
use crate::error::AppError;
use crate::math::{nan_max, nan_min};
use crate::models::constants::{EPSILON, velocity_unit};
use crate::models::frame::{ObserverFrame, basis_vectors, project};
use crate::models::streamline::{self, StreamlineCase};

/// Velocity components in the local spherical basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalVelocity {
    pub r: f64,
    pub theta: f64,
    pub phi: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicSample {
    pub velocity: SphericalVelocity,
    /// NaN on the singular streamline.
    pub density: f64,
    pub case: StreamlineCase,
}

/// Infall solution at one sample.
pub fn velocity_density(radius: f64, theta: f64) -> KinematicSample {
    let radius = radius.max(EPSILON);
    let cos_theta = theta.cos();
    let parity = if cos_theta > 0.0 {
        1.0
    } else if cos_theta < 0.0 {
        -1.0
    } else {
        0.0
    };
    let mu = cos_theta.abs().clamp(EPSILON, 1.0);

    let solution = streamline::solve(radius, mu);
    let mu0 = solution.mu0;
    let mm = mu / mu0;
    let sqrt_r = radius.sqrt();
    let plus = (1.0 + mm).sqrt();

    KinematicSample {
        velocity: SphericalVelocity {
            r: -plus / sqrt_r,
            theta: parity * plus * (mu0 - mu) / theta.sin() / sqrt_r,
            // mm exceeds 1 only by rounding.
            phi: (1.0 - mm).max(0.0).sqrt() / sqrt_r,
        },
        density: radius.powf(-1.5) / plus / (2.0 / radius * mu0 * mu0 + mm),
        case: solution.case,
    }
}

/// Elementwise [`velocity_density`] over equal-length sample arrays.
pub fn velocity_density_many(radius: &[f64], theta: &[f64]) -> Result<Vec<KinematicSample>, AppError> {
    if radius.len() != theta.len() {
        return Err(AppError::config(format!(
            "Radius ({}) and polar angle ({}) arrays must have equal length.",
            radius.len(),
            theta.len()
        )));
    }
    Ok(radius
        .par_iter()
        .zip(theta.par_iter())
        .map(|(&r, &t)| velocity_density(r, t))
        .collect())
}

/// Pure rotation: `v_φ = 1 / √(r sin θ)`.
pub fn kepler_velocity(radius: f64, theta: f64) -> SphericalVelocity {
    SphericalVelocity {
        r: 0.0,
        theta: 0.0,
        phi: 1.0 / (radius.max(EPSILON) * theta.sin()).sqrt(),
    }
}

/// Per-evaluation switches layered on top of the infall solution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeOptions {
    /// Scales `v_r` and `v_θ` of the infall branch.
    pub alpha_infall: f64,
    /// Keplerian disk inside the centrifugal radius.
    pub with_kepler: bool,
    /// Density multiplier applied inside the disk.
    pub density_scale: f64,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        Self {
            alpha_infall: 1.0,
            with_kepler: false,
            density_scale: 1.0,
        }
    }
}

/// Velocity and density with deceleration and the optional disk applied.
pub fn evaluate(radius: f64, theta: f64, options: &EnvelopeOptions) -> KinematicSample {
    let mut sample = velocity_density(radius, theta);
    if options.with_kepler && radius < 1.0 {
        sample.velocity = kepler_velocity(radius, theta);
        sample.density *= options.density_scale;
    } else {
        sample.velocity.r *= options.alpha_infall;
        sample.velocity.theta *= options.alpha_infall;
    }
    sample
}

/// Line-of-sight velocity envelope of one cut, in km/s per offset.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisExtrema {
    pub axis: CutAxis,
    pub max: Vec<f64>,
    pub min: Vec<f64>,
}

/// Largest and smallest infall line-of-sight velocity at each offset.
///
/// For every offset along the cut, the line of sight is scanned over the
/// same offsets (in au). Positions closer than Rc to the center are excluded;
/// an offset with no valid position reports NaN.
pub fn velocity_extrema(
    offsets: &[f64],
    stellar_mass: f64,
    centrifugal_radius: f64,
    inclination: f64,
) -> Result<Vec<AxisExtrema>, AppError> {
    if offsets.is_empty() {
        return Err(AppError::data("Velocity extrema need at least one offset."));
    }
    if !(stellar_mass > 0.0 && centrifugal_radius > 0.0) {
        return Err(AppError::config(format!(
            "Stellar mass and centrifugal radius must be > 0 (got {stellar_mass}, {centrifugal_radius})."
        )));
    }
    let vunit = velocity_unit(stellar_mass, centrifugal_radius);
    let frame = ObserverFrame::new(inclination.to_radians(), 0.0);
    let los = frame.line_of_sight();
    let scaled: Vec<f64> = offsets.iter().map(|o| o / centrifugal_radius).collect();

    let extrema = CutAxis::ALL
        .iter()
        .map(|&axis| {
            let (max, min): (Vec<f64>, Vec<f64>) = scaled
                .par_iter()
                .map(|&cut| {
                    let column: Vec<f64> = scaled
                        .iter()
                        .map(|&depth| {
                            if cut.hypot(depth) < 1.0 {
                                return f64::NAN;
                            }
                            let s = frame.to_spherical(axis.arrange(cut, 0.0, depth));
                            let v = velocity_density(s.radius, s.theta).velocity;
                            project(&los, &basis_vectors(s.theta, s.phi), &v) * vunit
                        })
                        .collect();
                    (
                        nan_max(&column).unwrap_or(f64::NAN),
                        nan_min(&column).unwrap_or(f64::NAN),
                    )
                })
                .unzip();
            AxisExtrema { axis, max, min }
        })
        .collect();
    Ok(extrema)
}
