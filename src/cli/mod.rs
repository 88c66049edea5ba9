//! Command-line parsing for the PV silhouette modeler.
//!
//! Argument parsing stays separate from the modeling code; `app` turns these
//! structs into domain types and runs the commands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::AxisSelection;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "pvsil", version, about = "Model and fit PV diagrams of infalling rotating envelopes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate mock PV diagram(s) and optionally add noise and write them out.
    Mock(MockArgs),
    /// Fit the envelope model to observed PV JSON files.
    Fit(FitArgs),
    /// Print the infall velocity extrema along the major and minor axes.
    Extrema(ExtremaArgs),
    /// Print a saved fit-result table.
    Report(ReportArgs),
    /// Print the nested grid layout for an axis specification.
    Grid(GridInfoArgs),
}

/// Physical model parameters.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Stellar mass (Msun).
    #[arg(long, default_value_t = 1.0)]
    pub mstar: f64,

    /// Centrifugal radius (au).
    #[arg(long, default_value_t = 100.0)]
    pub rc: f64,

    /// Deceleration factor of the infall velocity.
    #[arg(long, default_value_t = 1.0)]
    pub alpha: f64,

    /// Inclination (deg); 90 is edge-on.
    #[arg(long, default_value_t = 89.0)]
    pub incl: f64,

    /// Disk density contrast inside Rc.
    #[arg(long, default_value_t = 1.0)]
    pub frho: f64,

    /// Optical depth scale.
    #[arg(long, default_value_t = 1.0)]
    pub ftau: f64,

    /// Inner radius (au).
    #[arg(long, default_value_t = 1.0)]
    pub rin: f64,

    /// Outer radius (au); unbounded when omitted.
    #[arg(long)]
    pub rout: Option<f64>,

    /// Intrinsic line width (km/s).
    #[arg(long)]
    pub linewidth: Option<f64>,

    /// Position angle of the major-axis cut (deg).
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub pa: f64,

    /// Keplerian rotation inside Rc.
    #[arg(long)]
    pub kepler: bool,
}

/// Beam FWHM (au) and position angle (deg).
#[derive(Debug, Args, Clone)]
pub struct BeamArgs {
    #[arg(long)]
    pub bmaj: Option<f64>,

    /// Defaults to `--bmaj`.
    #[arg(long)]
    pub bmin: Option<f64>,

    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub bpa: f64,
}

/// Nested grid layout.
#[derive(Debug, Args, Clone)]
pub struct GridArgs {
    /// Sub-pixels per observed pixel.
    #[arg(long, default_value_t = 1)]
    pub nsubgrid: usize,

    /// Refinement factor of each nested level, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "3,3")]
    pub refine: Vec<usize>,

    /// Minimum number of parent cells a nested level spans.
    #[arg(long, default_value_t = 5)]
    pub reslim: usize,
}

/// Offset and velocity axes of a synthetic diagram.
#[derive(Debug, Args, Clone)]
pub struct AxisArgs {
    /// Largest offset (au); the axis runs symmetrically through 0.
    #[arg(long, default_value_t = 300.0)]
    pub rmax: f64,

    /// Offset pixel (au).
    #[arg(long, default_value_t = 10.0)]
    pub dx: f64,

    /// Largest velocity (km/s).
    #[arg(long, default_value_t = 5.0)]
    pub vmax: f64,

    /// Channel width (km/s).
    #[arg(long, default_value_t = 0.2)]
    pub dv: f64,
}

#[derive(Debug, Args, Clone)]
pub struct MockArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub beam: BeamArgs,

    #[command(flatten)]
    pub grid: GridArgs,

    #[command(flatten)]
    pub axes: AxisArgs,

    /// Which cut(s) to generate.
    #[arg(long, value_enum, default_value_t = AxisSelection::Both)]
    pub axis: AxisSelection,

    /// Add Gaussian noise of this standard deviation.
    #[arg(long)]
    pub noise: Option<f64>,

    /// Intensity of a unit model intensity.
    #[arg(long, default_value_t = 1.0)]
    pub peak: f64,

    /// Noise seed.
    #[arg(long, env = "PVSIL_SEED", default_value_t = 0)]
    pub seed: u64,

    /// Write `<prefix>.<axis>.json` per cut.
    #[arg(long, value_name = "PREFIX")]
    pub out: Option<PathBuf>,

    /// Export the model arrays to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Major-axis PV JSON file.
    #[arg(long, value_name = "JSON")]
    pub major: PathBuf,

    /// Minor-axis PV JSON file.
    #[arg(long, value_name = "JSON")]
    pub minor: Option<PathBuf>,

    /// Output prefix for `<prefix>.popt.txt` and `<prefix>.csv`.
    #[arg(long, default_value = "pvsil")]
    pub prefix: PathBuf,

    /// Inclination (deg).
    #[arg(long, default_value_t = 89.0)]
    pub incl: f64,

    /// Intrinsic line width (km/s).
    #[arg(long)]
    pub linewidth: Option<f64>,

    /// Major-axis position angle (deg); read from the file when omitted.
    #[arg(long, allow_negative_numbers = true)]
    pub pa: Option<f64>,

    #[arg(long, default_value_t = 1.0)]
    pub rin: f64,

    /// Outer radius (au); the largest offset when omitted.
    #[arg(long)]
    pub rout: Option<f64>,

    /// Disable Keplerian rotation inside Rc.
    #[arg(long)]
    pub no_kepler: bool,

    /// Velocity range `LO,HI` (km/s) excluded from the fit.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub vmask: Option<Vec<f64>>,

    /// Keep about this many offset samples per beam minor axis.
    #[arg(long)]
    pub per_beam: Option<f64>,

    /// Quadrant sign of the major cut (1 or -1); detected when omitted.
    #[arg(long, allow_negative_numbers = true, value_parser = parse_sign)]
    pub sign_major: Option<i32>,

    /// Quadrant sign of the minor cut (1 or -1); detected when omitted.
    #[arg(long, allow_negative_numbers = true, value_parser = parse_sign)]
    pub sign_minor: Option<i32>,

    /// Fix a parameter, `NAME=VALUE` (repeatable).
    #[arg(long, value_name = "NAME=VALUE")]
    pub fix: Vec<String>,

    /// Override a search range, `NAME=LO:HI` (repeatable).
    #[arg(long, value_name = "NAME=LO:HI", allow_hyphen_values = true)]
    pub range: Vec<String>,

    #[command(flatten)]
    pub grid: GridArgs,

    #[arg(long, env = "PVSIL_WALKERS_PER_DIM", default_value_t = 4)]
    pub walkers_per_dim: usize,

    #[arg(long, env = "PVSIL_BURNIN", default_value_t = 500)]
    pub burnin: usize,

    #[arg(long, env = "PVSIL_STEPS", default_value_t = 500)]
    pub steps: usize,

    #[arg(long, env = "PVSIL_SEED", default_value_t = 0)]
    pub seed: u64,
}

#[derive(Debug, Args, Clone)]
pub struct ExtremaArgs {
    #[arg(long, default_value_t = 1.0)]
    pub mstar: f64,

    #[arg(long, default_value_t = 100.0)]
    pub rc: f64,

    #[arg(long, default_value_t = 89.0)]
    pub incl: f64,

    #[arg(long, default_value_t = 300.0)]
    pub rmax: f64,

    #[arg(long, default_value_t = 10.0)]
    pub dx: f64,
}

#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    /// Fit-result table (`<prefix>.popt.txt`).
    #[arg(value_name = "TABLE")]
    pub table: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct GridInfoArgs {
    #[command(flatten)]
    pub grid: GridArgs,

    #[command(flatten)]
    pub axes: AxisArgs,

    #[command(flatten)]
    pub beam: BeamArgs,
}

fn parse_sign(s: &str) -> Result<i32, String> {
    match s.trim() {
        "1" | "+1" => Ok(1),
        "-1" => Ok(-1),
        other => Err(format!("quadrant sign must be 1 or -1, got '{other}'")),
    }
}
