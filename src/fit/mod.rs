//! Envelope fitting.
//!
//! Responsibilities:
//!
//! - map free parameter vectors to model parameters (`params`)
//! - score model PV diagrams against observations (`likelihood`)
//! - explore the posterior with an ensemble sampler (`sampler`)

pub mod likelihood;
pub mod params;
pub mod sampler;

pub use likelihood::*;
pub use params::*;
pub use sampler::*;

use tracing::info;

use crate::domain::{FitResult, ParamEstimate, ParamName};
use crate::error::AppError;

/// Sample the free parameters of `likelihood` and collect one estimate per
/// parameter. Fixed parameters report their value in every column.
pub fn run_fit<S: Sampler>(likelihood: &FitLikelihood, sampler: &S) -> Result<FitResult, AppError> {
    let space = likelihood.space();
    let free = space.free();
    if free.is_empty() {
        info!("all parameters fixed; skipping sampling");
        let estimates = ParamName::ALL
            .into_iter()
            .map(|name| ParamEstimate::fixed(name, space.fixed_value(name).unwrap_or(f64::NAN)))
            .collect();
        return Ok(FitResult { estimates });
    }

    let output = sampler.sample(&space.free_bounds(), |p| likelihood.lnprob(p))?;
    let best = space.expand(&output.best)?;
    likelihood.beats_reference(&best, output.best_lnprob);

    let estimates = ParamName::ALL
        .into_iter()
        .map(|name| match space.fixed_value(name) {
            Some(value) => ParamEstimate::fixed(name, value),
            None => {
                let d = free.iter().position(|p| *p == name).unwrap_or(0);
                ParamEstimate {
                    name,
                    best: output.best[d],
                    low: output.low[d],
                    mid: output.mid[d],
                    high: output.high[d],
                }
            }
        })
        .collect();
    Ok(FitResult { estimates })
}
