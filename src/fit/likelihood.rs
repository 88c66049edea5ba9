//! Log-probability of observed PV diagrams under the envelope model.
//!
//! For a full parameter vector the model intensity of each cut is scaled by
//! `fflux · obsmax`, mirrored along offset when the cut's quadrant sign is
//! negative, and compared with the observation:
//!
//! ```text
//! lnL = -1/2 Σ_cuts Σ_defined [(obs - model)² / s² + ln(2π s²)] / sqrt(R)
//! s²  = σ² + sig_mdl²
//! R   = beam area / dx²
//! ```
//!
//! `R` corrects for the correlation of pixels inside one beam. Undefined
//! observed pixels (including a masked velocity range) drop out of the sum.

use std::f64::consts::PI;

use ndarray::{Array2, Axis};
use tracing::{debug, info, warn};

use crate::domain::{AxisSelection, CutAxis, GridConfig, ModelParameters, ObservedPv, ParamName};
use crate::error::AppError;
use crate::fit::params::{ParamSpace, model_parameters};
use crate::math::nan_max;
use crate::pvd::MockPvd;

/// Inputs of the likelihood besides the observations themselves.
#[derive(Debug, Clone)]
pub struct LikelihoodConfig {
    /// Template for everything not sampled: inclination, line width, radii,
    /// cut position angle, Kepler blending.
    pub base: ModelParameters,
    pub grid: GridConfig,
    /// Open velocity interval (km/s) excluded from the comparison.
    pub vmask: Option<(f64, f64)>,
    /// Quadrant sign overrides; detected from the data when `None`.
    pub sign_major: Option<i32>,
    pub sign_minor: Option<i32>,
}

impl Default for LikelihoodConfig {
    fn default() -> Self {
        Self {
            base: ModelParameters {
                inclination: 89.0,
                with_kepler: true,
                ..ModelParameters::default()
            },
            grid: GridConfig::default(),
            vmask: None,
            sign_major: None,
            sign_minor: None,
        }
    }
}

#[derive(Debug, Clone)]
struct PreparedCut {
    axis: CutAxis,
    observed: Array2<f64>,
    sigma: f64,
    sign: i32,
}

/// Log-probabilities of the two trivial models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceLnprob {
    pub zero: f64,
    pub flat: f64,
}

#[derive(Debug)]
pub struct FitLikelihood {
    space: ParamSpace,
    base: ModelParameters,
    mock: MockPvd,
    cuts: Vec<PreparedCut>,
    obsmax: f64,
    oversampling: f64,
}

impl FitLikelihood {
    /// Prepare the comparison for a major cut and an optional minor cut.
    ///
    /// Both cuts must share the offset and velocity sampling. The model grid
    /// is laid out on the major cut's axes with its beam; the outer radius
    /// defaults to the largest offset.
    pub fn new(
        major: &ObservedPv,
        minor: Option<&ObservedPv>,
        space: ParamSpace,
        config: &LikelihoodConfig,
    ) -> Result<Self, AppError> {
        if major.axis != CutAxis::Major {
            return Err(AppError::config("The first observation must be a major-axis cut."));
        }
        if let Some(minor) = minor {
            if minor.axis != CutAxis::Minor {
                return Err(AppError::config("The second observation must be a minor-axis cut."));
            }
            if minor.offsets != major.offsets || minor.velocities != major.velocities {
                return Err(AppError::data(
                    "Major and minor cuts must share the offset and velocity axes.",
                ));
            }
        }

        let beam = major.effective_beam();
        let dx = major.pixel().abs();
        let oversampling = beam.area() / (dx * dx);

        let mut cuts = vec![prepare(major, config.vmask, config.sign_major)];
        if let Some(minor) = minor {
            cuts.push(prepare(minor, config.vmask, config.sign_minor));
        }
        let obsmax = nan_max(cuts.iter().flat_map(|c| c.observed.iter()))
            .filter(|m| *m > 0.0)
            .ok_or_else(|| AppError::data("Observed PV data has no positive pixel."))?;

        let outer = major.offsets.iter().fold(f64::NEG_INFINITY, |m, x| m.max(x.abs()));
        let base = ModelParameters {
            beam: Some(beam),
            outer_radius: config.base.outer_radius.or(Some(outer)),
            cut_axis: CutAxis::Major,
            cut_position_angle: major.position_angle.unwrap_or(config.base.cut_position_angle),
            ..config.base.clone()
        };
        base.validate()?;

        let mock = MockPvd::new(&major.offsets, &major.velocities, Some(beam), &config.grid)?;
        info!(
            cuts = cuts.len(),
            free = space.ndim(),
            obsmax,
            oversampling,
            "likelihood ready"
        );
        for cut in &cuts {
            debug!(axis = %cut.axis, sign = cut.sign, "quadrant sign");
        }

        Ok(Self {
            space,
            base,
            mock,
            cuts,
            obsmax,
            oversampling,
        })
    }

    pub fn space(&self) -> &ParamSpace {
        &self.space
    }

    pub fn mock(&self) -> &MockPvd {
        &self.mock
    }

    pub fn base(&self) -> &ModelParameters {
        &self.base
    }

    pub fn obsmax(&self) -> f64 {
        self.obsmax
    }

    pub fn axes(&self) -> Vec<CutAxis> {
        self.cuts.iter().map(|c| c.axis).collect()
    }

    /// Observed arrays as compared, i.e. with the velocity mask applied.
    pub fn observed(&self) -> Vec<(CutAxis, &Array2<f64>)> {
        self.cuts.iter().map(|c| (c.axis, &c.observed)).collect()
    }

    /// Scaled and oriented model arrays, one per observed cut.
    pub fn model(&self, values: &[f64; 7]) -> Result<Vec<Array2<f64>>, AppError> {
        let params = model_parameters(values, &self.base);
        let selection = if self.cuts.len() > 1 {
            AxisSelection::Both
        } else {
            AxisSelection::Major
        };
        let scale = params.flux_scale * self.obsmax;
        let pvs = self.mock.generate_mock_pvd(&params, selection)?;
        Ok(pvs
            .into_iter()
            .zip(&self.cuts)
            .map(|(pv, cut)| {
                let mut model = pv.intensity * scale;
                if cut.sign < 0 {
                    model.invert_axis(Axis(1));
                    model = model.as_standard_layout().to_owned();
                }
                model
            })
            .collect())
    }

    /// Gaussian log-likelihood of `models` against the observed cuts.
    pub fn compare(&self, models: &[Array2<f64>], sig_mdl: f64) -> f64 {
        let total: f64 = self
            .cuts
            .iter()
            .zip(models)
            .map(|(cut, model)| {
                let s2 = cut.sigma * cut.sigma + sig_mdl * sig_mdl;
                let norm = (2.0 * PI * s2).ln();
                cut.observed
                    .iter()
                    .zip(model.iter())
                    .map(|(o, m)| (o - m).powi(2) / s2 + norm)
                    .filter(|t| !t.is_nan())
                    .sum::<f64>()
            })
            .sum();
        -0.5 * total / self.oversampling.sqrt()
    }

    /// Log-probability of the free parameter vector; `-inf` outside the
    /// bounds or when the model cannot be evaluated.
    pub fn lnprob(&self, free: &[f64]) -> f64 {
        if !self.space.in_bounds(free) {
            return f64::NEG_INFINITY;
        }
        let values = match self.space.expand(free) {
            Ok(v) => v,
            Err(_) => return f64::NEG_INFINITY,
        };
        match self.model(&values) {
            Ok(models) => self.compare(&models, values[ParamName::SigMdl.index()]),
            Err(e) => {
                debug!(error = %e, "model evaluation failed");
                f64::NEG_INFINITY
            }
        }
    }

    /// Log-probabilities of the all-zero and the all-`obsmax` models.
    pub fn reference(&self, sig_mdl: f64) -> ReferenceLnprob {
        let zero: Vec<Array2<f64>> = self.cuts.iter().map(|c| Array2::zeros(c.observed.raw_dim())).collect();
        let flat: Vec<Array2<f64>> = self
            .cuts
            .iter()
            .map(|c| Array2::from_elem(c.observed.raw_dim(), self.obsmax))
            .collect();
        ReferenceLnprob {
            zero: self.compare(&zero, sig_mdl),
            flat: self.compare(&flat, sig_mdl),
        }
    }

    /// Whether `best_lnprob` beats both reference models; warns when not.
    pub fn beats_reference(&self, values: &[f64; 7], best_lnprob: f64) -> bool {
        let reference = self.reference(values[ParamName::SigMdl.index()]);
        let ok = best_lnprob > reference.zero && best_lnprob > reference.flat;
        if !ok {
            warn!(
                best = best_lnprob,
                zero = reference.zero,
                flat = reference.flat,
                "Best model does not beat the trivial reference models; the fit may be degenerate."
            );
        }
        ok
    }
}

fn prepare(pv: &ObservedPv, vmask: Option<(f64, f64)>, sign: Option<i32>) -> PreparedCut {
    PreparedCut {
        axis: pv.axis,
        observed: pv.masked(vmask),
        sigma: pv.sigma,
        sign: sign.unwrap_or_else(|| pv.quadrant_sign()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Beam;
    use crate::fit::params::Bounds;

    fn axis(n: i32, step: f64) -> Vec<f64> {
        (-n..=n).map(|i| f64::from(i) * step).collect()
    }

    fn config() -> LikelihoodConfig {
        LikelihoodConfig {
            grid: GridConfig {
                refinement: vec![],
                ..GridConfig::default()
            },
            ..LikelihoodConfig::default()
        }
    }

    fn truth() -> [f64; 7] {
        [0.5, 60.0, 1.0, 1.0, 0.0, 0.0, 0.0]
    }

    /// Noise-free major cut from the model itself, scaled so that `truth()`
    /// reproduces it once its fflux is set to `1 / peak`.
    fn observed(flip: bool) -> (ObservedPv, f64) {
        let offsets = axis(8, 20.0);
        let velocities = axis(8, 0.3);
        let beam = Beam::new(30.0, 30.0, 0.0).unwrap();
        let cfg = config();
        let mock = MockPvd::new(&offsets, &velocities, Some(beam), &cfg.grid).unwrap();
        let base = ModelParameters {
            beam: Some(beam),
            outer_radius: Some(160.0),
            ..cfg.base.clone()
        };
        let params = model_parameters(&truth(), &base);
        let mut data = mock.generate_mock_pvd(&params, AxisSelection::Major).unwrap()[0]
            .intensity
            .clone();
        if flip {
            data.invert_axis(Axis(1));
        }
        let peak = nan_max(data.iter()).unwrap();
        let pv = ObservedPv::new(CutAxis::Major, offsets, velocities, data, 0.05, Some(beam), Some(0.0)).unwrap();
        (pv, peak)
    }

    #[test]
    fn truth_scores_higher_than_a_wrong_mass() {
        let (obs, peak) = observed(false);
        let mut space = ParamSpace::defaults(obs.sigma).unwrap();
        for name in [ParamName::Rc, ParamName::AlphaInfall, ParamName::LogFtau, ParamName::LogFrho, ParamName::SigMdl] {
            space.fix(name, truth()[name.index()]).unwrap();
        }
        space.set_bounds(ParamName::Fflux, Bounds::new(0.01, 100.0).unwrap());
        let like = FitLikelihood::new(&obs, None, space, &config()).unwrap();
        assert!((like.obsmax() - peak).abs() < 1e-12);

        let fflux = 1.0 / peak;
        let at_truth = like.lnprob(&[0.5, fflux]);
        let wrong = like.lnprob(&[2.0, fflux]);
        assert!(at_truth.is_finite());
        assert!(at_truth > wrong, "{at_truth} vs {wrong}");
        assert!(like.beats_reference(&like.space().expand(&[0.5, fflux]).unwrap(), at_truth));
    }

    #[test]
    fn out_of_bounds_is_negative_infinity() {
        let (obs, _) = observed(false);
        let like = FitLikelihood::new(&obs, None, ParamSpace::defaults(obs.sigma).unwrap(), &config()).unwrap();
        assert_eq!(like.lnprob(&[20.0, 60.0, 1.0, 1.0, 0.0, 0.0, 0.0]), f64::NEG_INFINITY);
        assert_eq!(like.lnprob(&[0.5]), f64::NEG_INFINITY);
    }

    #[test]
    fn negative_sign_mirrors_the_model() {
        let (obs, peak) = observed(true);
        let values = [0.5, 60.0, 1.0, 1.0 / peak, 0.0, 0.0, 0.0];
        let flipped = FitLikelihood::new(
            &obs,
            None,
            ParamSpace::defaults(obs.sigma).unwrap(),
            &LikelihoodConfig {
                sign_major: Some(-1),
                ..config()
            },
        )
        .unwrap();
        let straight = FitLikelihood::new(
            &obs,
            None,
            ParamSpace::defaults(obs.sigma).unwrap(),
            &LikelihoodConfig {
                sign_major: Some(1),
                ..config()
            },
        )
        .unwrap();
        let a = flipped.compare(&flipped.model(&values).unwrap(), 0.0);
        let b = straight.compare(&straight.model(&values).unwrap(), 0.0);
        assert!(a > b, "{a} vs {b}");
    }

    #[test]
    fn masked_channels_do_not_contribute() {
        let (obs, _) = observed(false);
        let all = FitLikelihood::new(&obs, None, ParamSpace::defaults(obs.sigma).unwrap(), &config()).unwrap();
        let masked = FitLikelihood::new(
            &obs,
            None,
            ParamSpace::defaults(obs.sigma).unwrap(),
            &LikelihoodConfig {
                vmask: Some((-1.0, 1.0)),
                ..config()
            },
        )
        .unwrap();
        let (_, m) = masked.observed()[0];
        assert!(m.row(8).iter().all(|v| v.is_nan()));

        // A perfect model leaves only the normalization term per defined pixel;
        // 7 of 17 channels fall inside (-1, 1).
        let perfect = vec![obs.data.clone()];
        let ratio = masked.compare(&perfect, 0.0) / all.compare(&perfect, 0.0);
        assert!((ratio - 10.0 / 17.0).abs() < 1e-12, "{ratio}");
    }

    #[test]
    fn mismatched_cuts_are_rejected() {
        let (obs, _) = observed(false);
        let err = FitLikelihood::new(&obs, Some(&obs), ParamSpace::defaults(obs.sigma).unwrap(), &config()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
