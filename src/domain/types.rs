//! Shared domain types.
//!
//! These types are intentionally small value types so they can be:
//!
//! - created fresh for every model evaluation
//! - serialized into PV files and fit-result tables
//! - passed across threads during parallel likelihood evaluation

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::grid::LevelBox;

/// Which sky axis a PV cut runs along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CutAxis {
    Major,
    Minor,
}

impl CutAxis {
    pub const ALL: [CutAxis; 2] = [CutAxis::Major, CutAxis::Minor];

    pub fn name(self) -> &'static str {
        match self {
            CutAxis::Major => "major",
            CutAxis::Minor => "minor",
        }
    }

    /// Map grid coordinates `(cut offset, transverse, line of sight)` onto the
    /// observer frame `(X, Y, Z)` used by the envelope transform.
    ///
    /// Along the major axis the cut offset is `X`; along the minor axis the
    /// two in-plane roles are exchanged. Every other step of the geometry is
    /// shared by both axes.
    pub fn arrange(self, cut: f64, transverse: f64, los: f64) -> [f64; 3] {
        match self {
            CutAxis::Major => [cut, transverse, los],
            CutAxis::Minor => [transverse, cut, los],
        }
    }

    /// Sign applied to the detected quadrant of an observed PV diagram.
    pub fn quadrant_parity(self) -> i32 {
        match self {
            CutAxis::Major => 1,
            CutAxis::Minor => -1,
        }
    }
}

impl fmt::Display for CutAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CutAxis {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(CutAxis::Major),
            "minor" => Ok(CutAxis::Minor),
            other => Err(AppError::config(format!(
                "Invalid cut axis '{other}': must be 'major' or 'minor'."
            ))),
        }
    }
}

/// Which cut(s) to synthesize in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AxisSelection {
    Major,
    Minor,
    Both,
}

impl AxisSelection {
    pub fn axes(self) -> &'static [CutAxis] {
        match self {
            AxisSelection::Major => &[CutAxis::Major],
            AxisSelection::Minor => &[CutAxis::Minor],
            AxisSelection::Both => &CutAxis::ALL,
        }
    }
}

impl FromStr for AxisSelection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "major" => Ok(AxisSelection::Major),
            "minor" => Ok(AxisSelection::Minor),
            "both" => Ok(AxisSelection::Both),
            other => Err(AppError::config(format!(
                "Invalid axis '{other}': must be 'major', 'minor' or 'both'."
            ))),
        }
    }
}

/// Elliptical Gaussian beam: FWHM major/minor (au) and position angle (deg).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beam {
    pub major: f64,
    pub minor: f64,
    pub pa: f64,
}

impl Beam {
    pub fn new(major: f64, minor: f64, pa: f64) -> Result<Self, AppError> {
        let beam = Self { major, minor, pa };
        beam.validate()?;
        Ok(beam)
    }

    /// Stand-in beam for inputs without beam metadata: one pixel wide.
    pub fn placeholder(pixel: f64) -> Self {
        let size = pixel.abs();
        Self {
            major: size,
            minor: size,
            pa: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.major.is_finite() && self.minor.is_finite() && self.pa.is_finite()) {
            return Err(AppError::config("Beam parameters must be finite."));
        }
        if self.major <= 0.0 || self.minor <= 0.0 {
            return Err(AppError::config(format!(
                "Beam FWHM must be > 0 (major={}, minor={}).",
                self.major, self.minor
            )));
        }
        Ok(())
    }

    /// Gaussian beam solid angle in au².
    pub fn area(&self) -> f64 {
        PI / (4.0 * std::f64::consts::LN_2) * self.major * self.minor
    }
}

/// Physical and instrumental parameters of one model evaluation.
///
/// Lengths are in au, masses in solar masses, angles in degrees and
/// velocities in km/s.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    pub stellar_mass: f64,
    pub centrifugal_radius: f64,
    /// Deceleration applied to the infall components (v_r, v_θ).
    pub alpha_infall: f64,
    /// 90° is edge-on.
    pub inclination: f64,
    /// Density contrast of the Keplerian disk relative to the envelope.
    pub density_scale: f64,
    pub optical_depth_scale: f64,
    pub flux_scale: f64,
    pub inner_radius: f64,
    pub outer_radius: Option<f64>,
    pub line_width: Option<f64>,
    pub beam: Option<Beam>,
    pub cut_axis: CutAxis,
    /// Position angle of the cut along `cut_axis`.
    pub cut_position_angle: f64,
    /// Replace the infall solution by Keplerian rotation inside Rc.
    pub with_kepler: bool,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            stellar_mass: 1.0,
            centrifugal_radius: 100.0,
            alpha_infall: 1.0,
            inclination: 89.0,
            density_scale: 1.0,
            optical_depth_scale: 1.0,
            flux_scale: 1.0,
            inner_radius: 1.0,
            outer_radius: None,
            line_width: None,
            beam: None,
            cut_axis: CutAxis::Major,
            cut_position_angle: 0.0,
            with_kepler: false,
        }
    }
}

impl ModelParameters {
    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            ("stellar mass", self.stellar_mass),
            ("centrifugal radius", self.centrifugal_radius),
            ("density scale", self.density_scale),
            ("optical depth scale", self.optical_depth_scale),
        ];
        for (label, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(AppError::config(format!(
                    "Model {label} must be finite and > 0, got {value}."
                )));
            }
        }
        if !(self.alpha_infall.is_finite() && self.alpha_infall >= 0.0) {
            return Err(AppError::config(format!(
                "alpha_infall must be finite and >= 0, got {}.",
                self.alpha_infall
            )));
        }
        if !(self.inclination.is_finite() && self.cut_position_angle.is_finite()) {
            return Err(AppError::config("Inclination and position angle must be finite."));
        }
        if !(self.inner_radius.is_finite() && self.inner_radius >= 0.0) {
            return Err(AppError::config(format!(
                "Inner radius must be finite and >= 0, got {}.",
                self.inner_radius
            )));
        }
        if let Some(rout) = self.outer_radius {
            if !(rout.is_finite() && rout > self.inner_radius) {
                return Err(AppError::config(format!(
                    "Outer radius must be finite and > inner radius ({}), got {rout}.",
                    self.inner_radius
                )));
            }
        }
        if let Some(width) = self.line_width {
            if !(width.is_finite() && width > 0.0) {
                return Err(AppError::config(format!("Line width must be > 0, got {width}.")));
            }
        }
        if let Some(beam) = &self.beam {
            beam.validate()?;
        }
        Ok(())
    }

    /// Position angle of the cut along `axis`; the two cuts are orthogonal.
    pub fn position_angle_for(&self, axis: CutAxis) -> f64 {
        if axis == self.cut_axis {
            self.cut_position_angle
        } else {
            self.cut_position_angle + 90.0
        }
    }
}

/// Free or fixed parameters of the fit, in fit-result table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamName {
    #[serde(rename = "Mstar")]
    Mstar,
    #[serde(rename = "Rc")]
    Rc,
    #[serde(rename = "alphainfall")]
    AlphaInfall,
    #[serde(rename = "fflux")]
    Fflux,
    #[serde(rename = "log_ftau")]
    LogFtau,
    #[serde(rename = "log_frho")]
    LogFrho,
    #[serde(rename = "sig_mdl")]
    SigMdl,
}

impl ParamName {
    pub const ALL: [ParamName; 7] = [
        ParamName::Mstar,
        ParamName::Rc,
        ParamName::AlphaInfall,
        ParamName::Fflux,
        ParamName::LogFtau,
        ParamName::LogFrho,
        ParamName::SigMdl,
    ];

    pub fn index(self) -> usize {
        match self {
            ParamName::Mstar => 0,
            ParamName::Rc => 1,
            ParamName::AlphaInfall => 2,
            ParamName::Fflux => 3,
            ParamName::LogFtau => 4,
            ParamName::LogFrho => 5,
            ParamName::SigMdl => 6,
        }
    }

    /// Row label used in the fit-result table.
    pub fn label(self) -> &'static str {
        match self {
            ParamName::Mstar => "Mstar",
            ParamName::Rc => "Rc",
            ParamName::AlphaInfall => "alpha",
            ParamName::Fflux => "fflux",
            ParamName::LogFtau => "log_ftau",
            ParamName::LogFrho => "log_frho",
            ParamName::SigMdl => "sig_mdl",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            ParamName::Mstar => "Msun",
            ParamName::Rc => "au",
            _ => "",
        }
    }
}

impl FromStr for ParamName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        ParamName::ALL
            .into_iter()
            .find(|p| {
                p.label().eq_ignore_ascii_case(key)
                    || (*p == ParamName::AlphaInfall && key.eq_ignore_ascii_case("alphainfall"))
            })
            .ok_or_else(|| AppError::config(format!("Unknown parameter name '{key}'.")))
    }
}

/// One row of a fit result: best value plus low/mid/high quantiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamEstimate {
    pub name: ParamName,
    pub best: f64,
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl ParamEstimate {
    /// A fixed parameter reports its value in every column.
    pub fn fixed(name: ParamName, value: f64) -> Self {
        Self {
            name,
            best: value,
            low: value,
            mid: value,
            high: value,
        }
    }
}

/// Output of one fit, one estimate per parameter in `ParamName::ALL` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub estimates: Vec<ParamEstimate>,
}

impl FitResult {
    pub fn get(&self, name: ParamName) -> Option<&ParamEstimate> {
        self.estimates.iter().find(|e| e.name == name)
    }

    /// Best values indexed by `ParamName::index`.
    pub fn best_values(&self) -> Result<[f64; 7], AppError> {
        let mut out = [f64::NAN; 7];
        for name in ParamName::ALL {
            let est = self
                .get(name)
                .ok_or_else(|| AppError::data(format!("Fit result lacks parameter {}.", name.label())))?;
            out[name.index()] = est.best;
        }
        Ok(out)
    }
}

/// How the model grid is laid out relative to the observation pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct GridConfig {
    /// Sub-pixels per observed pixel along the cut and line-of-sight axes.
    pub nsubgrid: usize,
    /// Refinement factor of every nested level (level 1 onwards).
    pub refinement: Vec<usize>,
    /// Explicit nested boxes; derived automatically when `None`.
    pub level_boxes: Option<Vec<LevelBox>>,
    /// Minimum number of parent cells an automatic box spans per axis.
    pub resolution_floor: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            nsubgrid: 1,
            refinement: vec![3, 3],
            level_boxes: None,
            resolution_floor: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_axis_rejects_unknown_keyword() {
        let err = "diagonal".parse::<CutAxis>().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!("Minor".parse::<CutAxis>().unwrap(), CutAxis::Minor);
    }

    #[test]
    fn arrange_swaps_in_plane_roles_for_minor() {
        assert_eq!(CutAxis::Major.arrange(1.0, 2.0, 3.0), [1.0, 2.0, 3.0]);
        assert_eq!(CutAxis::Minor.arrange(1.0, 2.0, 3.0), [2.0, 1.0, 3.0]);
    }

    #[test]
    fn position_angle_of_other_axis_is_orthogonal() {
        let params = ModelParameters {
            cut_position_angle: 30.0,
            ..ModelParameters::default()
        };
        assert_eq!(params.position_angle_for(CutAxis::Major), 30.0);
        assert_eq!(params.position_angle_for(CutAxis::Minor), 120.0);
    }

    #[test]
    fn param_names_parse_from_labels() {
        assert_eq!("alpha".parse::<ParamName>().unwrap(), ParamName::AlphaInfall);
        assert_eq!("alphainfall".parse::<ParamName>().unwrap(), ParamName::AlphaInfall);
        assert_eq!("log_frho".parse::<ParamName>().unwrap(), ParamName::LogFrho);
        assert!("mass".parse::<ParamName>().is_err());
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let params = ModelParameters {
            outer_radius: Some(0.5),
            ..ModelParameters::default()
        };
        assert_eq!(params.validate().unwrap_err().exit_code(), 2);
    }
}
