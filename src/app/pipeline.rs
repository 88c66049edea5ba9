//! Command workflows shared by the CLI handlers.
//!
//! Each `run_*` function turns parsed arguments into domain types, runs the
//! computation and writes any requested files. Printing is left to `app`.

use std::path::PathBuf;

use tracing::info;

use crate::cli::{AxisArgs, BeamArgs, ExtremaArgs, FitArgs, GridArgs, GridInfoArgs, MockArgs, ModelArgs};
use crate::data::{NoiseSpec, synthesize};
use crate::domain::{Beam, CutAxis, FitResult, GridConfig, ModelParameters, ObservedPv, ParamName};
use crate::error::AppError;
use crate::fit::{Bounds, EnsembleSampler, FitLikelihood, LikelihoodConfig, ParamSpace, run_fit as sample_fit};
use crate::io::{PvExport, read_pv_json, table_path, write_fit_result, write_pv_csv, write_pv_json};
use crate::math::centered_axis;
use crate::models::{AxisExtrema, velocity_extrema};
use crate::pvd::{MockPvd, ModelPv};
use crate::report::{ResidualStats, residual_map, residual_stats};

/// Outputs of `pvsil mock`.
#[derive(Debug)]
pub struct MockRun {
    pub params: ModelParameters,
    pub mock: MockPvd,
    pub pvs: Vec<ModelPv>,
    pub written: Vec<PathBuf>,
}

/// Outputs of `pvsil fit`.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub result: FitResult,
    pub residuals: Vec<ResidualStats>,
    pub table: PathBuf,
    pub export: PathBuf,
}

pub fn beam_from_args(args: &BeamArgs) -> Result<Option<Beam>, AppError> {
    match (args.bmaj, args.bmin) {
        (None, None) => Ok(None),
        (Some(major), minor) => Beam::new(major, minor.unwrap_or(major), args.bpa).map(Some),
        (None, Some(_)) => Err(AppError::config("--bmin needs --bmaj.")),
    }
}

pub fn grid_config(args: &GridArgs) -> GridConfig {
    GridConfig {
        nsubgrid: args.nsubgrid,
        refinement: args.refine.clone(),
        level_boxes: None,
        resolution_floor: args.reslim,
    }
}

pub fn model_parameters(args: &ModelArgs, beam: Option<Beam>) -> ModelParameters {
    ModelParameters {
        stellar_mass: args.mstar,
        centrifugal_radius: args.rc,
        alpha_infall: args.alpha,
        inclination: args.incl,
        density_scale: args.frho,
        optical_depth_scale: args.ftau,
        flux_scale: 1.0,
        inner_radius: args.rin,
        outer_radius: args.rout,
        line_width: args.linewidth,
        beam,
        cut_axis: CutAxis::Major,
        cut_position_angle: args.pa,
        with_kepler: args.kepler,
    }
}

/// Offset and velocity axes, both centered on zero.
pub fn axes(args: &AxisArgs) -> Result<(Vec<f64>, Vec<f64>), AppError> {
    Ok((centered_axis(args.rmax, args.dx)?, centered_axis(args.vmax, args.dv)?))
}

pub fn run_mock(args: &MockArgs) -> Result<MockRun, AppError> {
    let beam = beam_from_args(&args.beam)?;
    let params = model_parameters(&args.model, beam);
    params.validate()?;
    let (offsets, velocities) = axes(&args.axes)?;
    let mock = MockPvd::new(&offsets, &velocities, beam, &grid_config(&args.grid))?;

    let mut written = Vec::new();
    let pvs: Vec<ModelPv> = match args.noise {
        Some(sigma) => {
            let noise = NoiseSpec {
                scale: args.peak,
                sigma,
                seed: Some(args.seed),
            };
            let observed = synthesize(&mock, &params, args.axis, &noise)?;
            if let Some(prefix) = &args.out {
                for pv in &observed {
                    let path = suffixed(prefix, &format!(".{}.json", pv.axis));
                    write_pv_json(&path, pv)?;
                    written.push(path);
                }
            }
            observed
                .into_iter()
                .map(|pv| ModelPv {
                    axis: pv.axis,
                    intensity: pv.data,
                })
                .collect()
        }
        None => {
            if args.out.is_some() {
                return Err(AppError::config("Writing PV files needs --noise to set the noise level."));
            }
            mock.generate_mock_pvd(&params, args.axis)?
                .into_iter()
                .map(|pv| ModelPv {
                    intensity: pv.intensity * args.peak,
                    ..pv
                })
                .collect()
        }
    };

    if let Some(path) = &args.export {
        let cuts: Vec<PvExport<'_>> = pvs
            .iter()
            .map(|pv| PvExport {
                axis: pv.axis,
                offsets: mock.offsets(),
                velocities: mock.velocities(),
                observed: None,
                model: Some(&pv.intensity),
            })
            .collect();
        write_pv_csv(path, &cuts)?;
        written.push(path.clone());
    }

    Ok(MockRun {
        params,
        mock,
        pvs,
        written,
    })
}

pub fn run_fit(args: &FitArgs) -> Result<FitRun, AppError> {
    let major = load_cut(&args.major, CutAxis::Major, args)?;
    let minor = args
        .minor
        .as_ref()
        .map(|path| load_cut(path, CutAxis::Minor, args))
        .transpose()?;

    let mut space = ParamSpace::defaults(major.sigma)?;
    for spec in &args.range {
        let (name, bounds) = parse_range(spec)?;
        space.set_bounds(name, bounds);
    }
    for spec in &args.fix {
        let (name, value) = parse_fix(spec)?;
        space.fix(name, value)?;
    }

    let config = LikelihoodConfig {
        base: ModelParameters {
            inclination: args.incl,
            line_width: args.linewidth,
            inner_radius: args.rin,
            outer_radius: args.rout,
            with_kepler: !args.no_kepler,
            ..ModelParameters::default()
        },
        grid: grid_config(&args.grid),
        vmask: parse_vmask(args.vmask.as_deref())?,
        sign_major: args.sign_major,
        sign_minor: args.sign_minor,
    };
    let likelihood = FitLikelihood::new(&major, minor.as_ref(), space, &config)?;

    let sampler = EnsembleSampler {
        walkers_per_dim: args.walkers_per_dim,
        burnin: args.burnin,
        steps: args.steps,
        seed: args.seed,
        ..EnsembleSampler::default()
    };
    let result = sample_fit(&likelihood, &sampler)?;

    let table = table_path(&args.prefix);
    write_fit_result(&table, &result)?;

    let models = likelihood.model(&result.best_values()?)?;
    let sources: Vec<&ObservedPv> = std::iter::once(&major).chain(minor.as_ref()).collect();
    let mut residuals = Vec::with_capacity(models.len());
    let mut cuts = Vec::with_capacity(models.len());
    for ((axis, observed), (model, source)) in likelihood.observed().into_iter().zip(models.iter().zip(&sources)) {
        residuals.push(residual_stats(axis, &residual_map(observed, model)?, source.sigma));
        cuts.push(PvExport {
            axis,
            offsets: &source.offsets,
            velocities: &source.velocities,
            observed: Some(observed),
            model: Some(model),
        });
    }
    let export = suffixed(&args.prefix, ".csv");
    write_pv_csv(&export, &cuts)?;
    info!(table = %table.display(), export = %export.display(), "fit outputs written");

    Ok(FitRun {
        result,
        residuals,
        table,
        export,
    })
}

pub fn run_extrema(args: &ExtremaArgs) -> Result<(Vec<f64>, Vec<AxisExtrema>), AppError> {
    let offsets = centered_axis(args.rmax, args.dx)?;
    let extrema = velocity_extrema(&offsets, args.mstar, args.rc, args.incl)?;
    Ok((offsets, extrema))
}

pub fn run_grid(args: &GridInfoArgs) -> Result<MockPvd, AppError> {
    let beam = beam_from_args(&args.beam)?;
    let (offsets, velocities) = axes(&args.axes)?;
    MockPvd::new(&offsets, &velocities, beam, &grid_config(&args.grid))
}

fn load_cut(path: &std::path::Path, expected: CutAxis, args: &FitArgs) -> Result<ObservedPv, AppError> {
    let mut pv = read_pv_json(path)?;
    if pv.axis != expected {
        return Err(AppError::config(format!(
            "'{}' holds a {} cut, expected {expected}.",
            path.display(),
            pv.axis
        )));
    }
    if let Some(pa) = args.pa {
        pv.position_angle = Some(if expected == CutAxis::Major { pa } else { pa + 90.0 });
    }
    match args.per_beam {
        Some(per_beam) => pv.thinned(per_beam),
        None => Ok(pv),
    }
}

/// `NAME=VALUE`
pub fn parse_fix(spec: &str) -> Result<(ParamName, f64), AppError> {
    let (name, value) = spec
        .split_once('=')
        .ok_or_else(|| AppError::config(format!("Expected NAME=VALUE, got '{spec}'.")))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| AppError::config(format!("Invalid value in '{spec}': {e}")))?;
    Ok((name.parse()?, value))
}

/// `NAME=LO:HI`
pub fn parse_range(spec: &str) -> Result<(ParamName, Bounds), AppError> {
    let (name, range) = spec
        .split_once('=')
        .ok_or_else(|| AppError::config(format!("Expected NAME=LO:HI, got '{spec}'.")))?;
    let (lo, hi) = range
        .split_once(':')
        .ok_or_else(|| AppError::config(format!("Expected NAME=LO:HI, got '{spec}'.")))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| AppError::config(format!("Invalid bound in '{spec}': {e}")))
    };
    Ok((name.parse()?, Bounds::new(parse(lo)?, parse(hi)?)?))
}

pub fn parse_vmask(values: Option<&[f64]>) -> Result<Option<(f64, f64)>, AppError> {
    match values {
        None => Ok(None),
        Some([lo, hi]) if lo < hi => Ok(Some((*lo, *hi))),
        Some(other) => Err(AppError::config(format!(
            "--vmask needs LO,HI with LO < HI, got {other:?}."
        ))),
    }
}

fn suffixed(prefix: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
