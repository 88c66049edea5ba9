//! Affine-invariant ensemble sampler (stretch move).
//!
//! Walkers are split into two halves; each half is moved using the positions
//! of the other, so the proposals of one half can be evaluated in parallel.
//! All random draws happen on one seeded generator before the parallel
//! evaluation, which keeps a run reproducible regardless of thread count.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::AppError;
use crate::fit::params::Bounds;
use crate::math::quantile;

/// Summary of a sampling run over the free parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerOutput {
    pub best: Vec<f64>,
    pub best_lnprob: f64,
    pub low: Vec<f64>,
    pub mid: Vec<f64>,
    pub high: Vec<f64>,
    pub acceptance: f64,
    pub samples: usize,
}

pub trait Sampler {
    fn sample<F>(&self, bounds: &[Bounds], lnprob: F) -> Result<SamplerOutput, AppError>
    where
        F: Fn(&[f64]) -> f64 + Sync;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSampler {
    pub walkers_per_dim: usize,
    pub burnin: usize,
    pub steps: usize,
    pub seed: u64,
    /// Stretch scale `a` of the proposal `z ~ g(z) ∝ 1/sqrt(z)` on `[1/a, a]`.
    pub stretch: f64,
}

impl Default for EnsembleSampler {
    fn default() -> Self {
        Self {
            walkers_per_dim: 4,
            burnin: 500,
            steps: 500,
            seed: 0,
            stretch: 2.0,
        }
    }
}

struct Proposal {
    walker: usize,
    position: Vec<f64>,
    log_z: f64,
    log_u: f64,
}

impl Sampler for EnsembleSampler {
    fn sample<F>(&self, bounds: &[Bounds], lnprob: F) -> Result<SamplerOutput, AppError>
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let ndim = bounds.len();
        if ndim == 0 {
            return Err(AppError::data("No free parameters to sample."));
        }
        if self.walkers_per_dim == 0 || self.steps == 0 {
            return Err(AppError::config("Walkers per dimension and steps must be > 0."));
        }
        if !(self.stretch > 1.0) {
            return Err(AppError::config(format!("Stretch scale must be > 1, got {}.", self.stretch)));
        }
        let mut nwalkers = (self.walkers_per_dim * ndim).max(2 * ndim);
        nwalkers += nwalkers % 2;
        let half = nwalkers / 2;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut walkers: Vec<Vec<f64>> = (0..nwalkers)
            .map(|_| bounds.iter().map(|b| rng.gen_range(b.low..b.high)).collect())
            .collect();
        let mut lnp: Vec<f64> = walkers.par_iter().map(|w| lnprob(w)).collect();
        info!(ndim, nwalkers, burnin = self.burnin, steps = self.steps, "sampling");

        let mut chain: Vec<(Vec<f64>, f64)> = Vec::with_capacity(nwalkers * self.steps);
        let mut accepted = 0usize;
        let mut proposed = 0usize;
        let a = self.stretch;

        for step in 0..self.burnin + self.steps {
            for (active, other) in [(0..half, half..nwalkers), (half..nwalkers, 0..half)] {
                let proposals: Vec<Proposal> = active
                    .map(|k| {
                        let j = rng.gen_range(other.clone());
                        let u: f64 = rng.gen_range(0.0..1.0);
                        let z = ((a - 1.0) * u + 1.0).powi(2) / a;
                        let position = walkers[j]
                            .iter()
                            .zip(&walkers[k])
                            .map(|(xj, xk)| xj + z * (xk - xj))
                            .collect();
                        Proposal {
                            walker: k,
                            position,
                            log_z: z.ln(),
                            log_u: rng.gen_range(0.0f64..1.0).ln(),
                        }
                    })
                    .collect();
                let scores: Vec<f64> = proposals.par_iter().map(|p| lnprob(&p.position)).collect();
                for (p, new_lnp) in proposals.into_iter().zip(scores) {
                    let log_q = (ndim as f64 - 1.0) * p.log_z + new_lnp - lnp[p.walker];
                    proposed += 1;
                    if new_lnp.is_finite() && p.log_u < log_q {
                        walkers[p.walker] = p.position;
                        lnp[p.walker] = new_lnp;
                        accepted += 1;
                    }
                }
            }
            if step >= self.burnin {
                chain.extend(walkers.iter().cloned().zip(lnp.iter().copied()));
            }
            if (step + 1) % 100 == 0 {
                debug!(step = step + 1, acceptance = accepted as f64 / proposed as f64, "sampler progress");
            }
        }

        summarize(&chain, ndim, accepted as f64 / proposed.max(1) as f64)
    }
}

fn summarize(chain: &[(Vec<f64>, f64)], ndim: usize, acceptance: f64) -> Result<SamplerOutput, AppError> {
    let (best, best_lnprob) = chain
        .iter()
        .filter(|(_, l)| l.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(p, l)| (p.clone(), *l))
        .ok_or_else(|| AppError::internal("Sampler produced no sample with finite log-probability."))?;

    let mut low = Vec::with_capacity(ndim);
    let mut mid = Vec::with_capacity(ndim);
    let mut high = Vec::with_capacity(ndim);
    for d in 0..ndim {
        let column: Vec<f64> = chain.iter().map(|(p, _)| p[d]).collect();
        let q = |f: f64| quantile(&column, f).ok_or_else(|| AppError::internal("Empty chain."));
        low.push(q(0.16)?);
        mid.push(q(0.50)?);
        high.push(q(0.84)?);
    }
    info!(best_lnprob, acceptance, "sampling done");
    Ok(SamplerOutput {
        best,
        best_lnprob,
        low,
        mid,
        high,
        acceptance,
        samples: chain.len(),
    })
}
