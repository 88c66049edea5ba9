//! Fit parameter space: bounds, fixed values and the model mapping.
//!
//! The full parameter vector always has [`ParamName::ALL`] order:
//! `Mstar, Rc, alphainfall, fflux, log_ftau, log_frho, sig_mdl`. Fixed
//! parameters are removed from the vector handed to the sampler and restored
//! by [`ParamSpace::expand`].

use crate::domain::{ModelParameters, ParamName};
use crate::error::AppError;

/// Closed interval `[low, high]` with `low < high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub low: f64,
    pub high: f64,
}

impl Bounds {
    pub fn new(low: f64, high: f64) -> Result<Self, AppError> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(AppError::config(format!(
                "Invalid parameter range [{low}, {high}]: need finite low < high."
            )));
        }
        Ok(Self { low, high })
    }

    pub fn contains(&self, value: f64) -> bool {
        self.low <= value && value <= self.high
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpace {
    bounds: [Bounds; 7],
    fixed: [Option<f64>; 7],
}

impl ParamSpace {
    /// Default search ranges; the model-noise range is `[0, 10]` noise levels.
    pub fn defaults(sigma: f64) -> Result<Self, AppError> {
        if !(sigma.is_finite() && sigma > 0.0) {
            return Err(AppError::config(format!("Noise level must be > 0, got {sigma}.")));
        }
        Ok(Self {
            bounds: [
                Bounds::new(0.01, 10.0)?,
                Bounds::new(1.0, 1000.0)?,
                Bounds::new(0.0, 1.0)?,
                Bounds::new(0.3, 3.0)?,
                Bounds::new(-1.0, 3.0)?,
                Bounds::new(-1.0, 4.0)?,
                Bounds::new(0.0, 10.0 * sigma)?,
            ],
            fixed: [None; 7],
        })
    }

    pub fn bounds(&self, name: ParamName) -> Bounds {
        self.bounds[name.index()]
    }

    pub fn set_bounds(&mut self, name: ParamName, bounds: Bounds) {
        self.bounds[name.index()] = bounds;
    }

    pub fn fix(&mut self, name: ParamName, value: f64) -> Result<(), AppError> {
        if !value.is_finite() {
            return Err(AppError::config(format!(
                "Fixed value of {} must be finite, got {value}.",
                name.label()
            )));
        }
        self.fixed[name.index()] = Some(value);
        Ok(())
    }

    pub fn fixed_value(&self, name: ParamName) -> Option<f64> {
        self.fixed[name.index()]
    }

    pub fn free(&self) -> Vec<ParamName> {
        ParamName::ALL
            .into_iter()
            .filter(|p| self.fixed[p.index()].is_none())
            .collect()
    }

    pub fn ndim(&self) -> usize {
        self.fixed.iter().filter(|f| f.is_none()).count()
    }

    pub fn free_bounds(&self) -> Vec<Bounds> {
        self.free().into_iter().map(|p| self.bounds[p.index()]).collect()
    }

    /// Full parameter vector from the free values.
    pub fn expand(&self, free: &[f64]) -> Result<[f64; 7], AppError> {
        if free.len() != self.ndim() {
            return Err(AppError::internal(format!(
                "Got {} free values for {} free parameters.",
                free.len(),
                self.ndim()
            )));
        }
        let mut values = [0.0; 7];
        let mut it = free.iter();
        for (slot, fixed) in values.iter_mut().zip(self.fixed.iter()) {
            *slot = match fixed {
                Some(v) => *v,
                None => it.next().copied().unwrap_or(f64::NAN),
            };
        }
        Ok(values)
    }

    pub fn in_bounds(&self, free: &[f64]) -> bool {
        free.len() == self.ndim()
            && self
                .free()
                .iter()
                .zip(free)
                .all(|(p, &v)| self.bounds[p.index()].contains(v))
    }
}

/// Model parameters for one full parameter vector.
///
/// `fflux` is carried as `flux_scale`; the optical-depth and density factors
/// are given in log10.
pub fn model_parameters(values: &[f64; 7], base: &ModelParameters) -> ModelParameters {
    ModelParameters {
        stellar_mass: values[ParamName::Mstar.index()],
        centrifugal_radius: values[ParamName::Rc.index()],
        alpha_infall: values[ParamName::AlphaInfall.index()],
        flux_scale: values[ParamName::Fflux.index()],
        optical_depth_scale: 10f64.powf(values[ParamName::LogFtau.index()]),
        density_scale: 10f64.powf(values[ParamName::LogFrho.index()]),
        ..base.clone()
    }
}
