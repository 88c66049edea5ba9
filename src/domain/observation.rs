//! Observed PV diagrams as handed over by the data reader.
//!
//! The reader (FITS parsing, unit conversion) lives outside this crate. What
//! arrives here is already in physical units: offsets in au, velocities in
//! km/s relative to the systemic velocity, intensities in the map's native
//! unit, and a noise level `sigma` in the same unit.

use ndarray::{Array2, Axis, s};
use tracing::warn;

use crate::domain::{Beam, CutAxis};
use crate::error::AppError;
use crate::math::{nan_max, nan_sum, uniform_step};

/// One observed PV cut: `data` is shaped (velocities × offsets).
#[derive(Debug, Clone)]
pub struct ObservedPv {
    pub axis: CutAxis,
    pub offsets: Vec<f64>,
    pub velocities: Vec<f64>,
    pub data: Array2<f64>,
    pub sigma: f64,
    pub beam: Option<Beam>,
    pub position_angle: Option<f64>,
}

impl ObservedPv {
    /// Validate shapes and normalize both axes to ascending order.
    pub fn new(
        axis: CutAxis,
        offsets: Vec<f64>,
        velocities: Vec<f64>,
        data: Array2<f64>,
        sigma: f64,
        beam: Option<Beam>,
        position_angle: Option<f64>,
    ) -> Result<Self, AppError> {
        if data.nrows() != velocities.len() || data.ncols() != offsets.len() {
            return Err(AppError::data(format!(
                "PV data shape {:?} does not match velocities ({}) x offsets ({}).",
                data.dim(),
                velocities.len(),
                offsets.len()
            )));
        }
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(AppError::config(format!("Noise level sigma must be > 0, got {sigma}.")));
        }
        if let Some(beam) = &beam {
            beam.validate()?;
        }

        let mut pv = Self {
            axis,
            offsets,
            velocities,
            data,
            sigma,
            beam,
            position_angle,
        };

        if uniform_step(&pv.offsets, "Offset")? < 0.0 {
            pv.offsets.reverse();
            pv.data.invert_axis(Axis(1));
        }
        if uniform_step(&pv.velocities, "Velocity")? < 0.0 {
            pv.velocities.reverse();
            pv.data.invert_axis(Axis(0));
        }
        pv.data = pv.data.as_standard_layout().to_owned();
        Ok(pv)
    }

    /// Offset pixel size (au).
    pub fn pixel(&self) -> f64 {
        self.offsets[1] - self.offsets[0]
    }

    /// The beam, or a one-pixel placeholder when the input carried none.
    pub fn effective_beam(&self) -> Beam {
        match self.beam {
            Some(beam) => beam,
            None => {
                warn!(
                    axis = %self.axis,
                    "No valid beam in the input; using a one-pixel placeholder beam."
                );
                Beam::placeholder(self.pixel())
            }
        }
    }

    /// Peak intensity ignoring undefined pixels.
    pub fn peak(&self) -> Option<f64> {
        nan_max(self.data.iter())
    }

    /// Keep roughly `per_beam` offset samples per beam minor axis.
    ///
    /// The stride is `floor(bmin / per_beam / dx)` (at least 1) and sampling
    /// starts at half a stride so the kept pixels stay centered.
    pub fn thinned(&self, per_beam: f64) -> Result<Self, AppError> {
        if !(per_beam.is_finite() && per_beam > 0.0) {
            return Err(AppError::config(format!(
                "Samples per beam must be > 0, got {per_beam}."
            )));
        }
        let beam = self.effective_beam();
        let stride = ((beam.minor / per_beam / self.pixel()) as usize).max(1);
        if stride == 1 {
            return Ok(self.clone());
        }
        let start = stride / 2;
        let offsets: Vec<f64> = self.offsets.iter().skip(start).step_by(stride).copied().collect();
        if offsets.len() < 2 {
            return Err(AppError::data(format!(
                "Thinning to {per_beam} samples per beam leaves fewer than 2 offsets."
            )));
        }
        let data = self.data.slice(s![.., start..;stride]).to_owned();
        Ok(Self {
            offsets,
            data,
            ..self.clone()
        })
    }

    /// Copy of the data with channels inside the open interval `vmask` undefined.
    pub fn masked(&self, vmask: Option<(f64, f64)>) -> Array2<f64> {
        let mut data = self.data.clone();
        if let Some((lo, hi)) = vmask {
            for (mut row, &v) in data.outer_iter_mut().zip(self.velocities.iter()) {
                if lo < v && v < hi {
                    row.fill(f64::NAN);
                }
            }
        }
        data
    }

    /// Sign of (Q1 + Q3 - Q2 - Q4) with the axis parity applied.
    ///
    /// Quadrants are split at the middle row/column of the array. The sign
    /// tells which diagonal carries the emission; model diagrams are
    /// mirrored along offset when it is negative.
    pub fn quadrant_sign(&self) -> i32 {
        let (nv, nx) = self.data.dim();
        let (hv, hx) = (nv / 2, nx / 2);
        let d = &self.data;
        let q = nan_sum(d.slice(s![..hv, ..hx]).iter()) + nan_sum(d.slice(s![hv.., hx..]).iter())
            - nan_sum(d.slice(s![hv.., ..hx]).iter())
            - nan_sum(d.slice(s![..hv, hx..]).iter());
        let sign = if q < 0.0 { -1 } else { 1 };
        sign * self.axis.quadrant_parity()
    }
}
