//! Synthetic observations from the envelope model.
//!
//! A mock PV diagram is scaled to a peak intensity and, optionally, Gaussian
//! noise of standard deviation `sigma` is added from a seeded generator. The
//! result is a regular [`ObservedPv`] and can be fitted like real data.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::info;

use crate::domain::{AxisSelection, ModelParameters, ObservedPv};
use crate::error::AppError;
use crate::pvd::MockPvd;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSpec {
    /// Intensity the unit model intensity maps to.
    pub scale: f64,
    /// Noise level reported with the observation.
    pub sigma: f64,
    /// Noise seed; `None` leaves the data noise-free.
    pub seed: Option<u64>,
}

pub fn synthesize(
    mock: &MockPvd,
    params: &ModelParameters,
    selection: AxisSelection,
    noise: &NoiseSpec,
) -> Result<Vec<ObservedPv>, AppError> {
    if !(noise.scale.is_finite() && noise.scale > 0.0) {
        return Err(AppError::config(format!("Intensity scale must be > 0, got {}.", noise.scale)));
    }
    let normal = Normal::new(0.0, noise.sigma)
        .map_err(|e| AppError::config(format!("Noise distribution error: {e}")))?;
    let mut rng = noise.seed.map(StdRng::seed_from_u64);

    let pvs = mock.generate_mock_pvd(params, selection)?;
    let mut out = Vec::with_capacity(pvs.len());
    for pv in pvs {
        let mut data = pv.intensity * noise.scale;
        if let Some(rng) = rng.as_mut() {
            data.mapv_inplace(|v| v + normal.sample(rng));
        }
        out.push(ObservedPv::new(
            pv.axis,
            mock.offsets().to_vec(),
            mock.velocities().to_vec(),
            data,
            noise.sigma,
            params.beam.or(mock.beam()),
            Some(params.position_angle_for(pv.axis)),
        )?);
    }
    info!(
        cuts = out.len(),
        sigma = noise.sigma,
        noisy = noise.seed.is_some(),
        "synthetic observation ready"
    );
    Ok(out)
}
