//! Memoized velocity bins and convolution kernels.
//!
//! One cache belongs to one [`MockPvd`](super::MockPvd). Entries are keyed by
//! the exact bit patterns of every value that determines them, so callers
//! evaluating different parameter sets concurrently never see each other's
//! kernels and a changed line width or position angle always builds a fresh
//! entry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use ndarray::Array2;
use tracing::debug;

use crate::domain::Beam;
use crate::error::AppError;
use crate::pvd::deposit::VelocityBins;

/// Identity of a uniform axis: length, first value and step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AxisKey {
    len: usize,
    start: u64,
    step: u64,
}

impl AxisKey {
    pub fn of(values: &[f64]) -> Self {
        let start = values.first().copied().unwrap_or(0.0);
        let step = if values.len() > 1 { values[1] - values[0] } else { 0.0 };
        Self {
            len: values.len(),
            start: start.to_bits(),
            step: step.to_bits(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SpectralKey {
    axis: AxisKey,
    line_width: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BeamKey {
    major: u64,
    minor: u64,
    /// Beam position angle minus cut position angle.
    rotation: u64,
    x: AxisKey,
    y: AxisKey,
}

/// Entry counts, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheCounts {
    pub bins: usize,
    pub spectral: usize,
    pub beam: usize,
}

#[derive(Debug, Default)]
pub struct KernelCache {
    bins: Mutex<HashMap<AxisKey, Arc<VelocityBins>>>,
    spectral: Mutex<HashMap<SpectralKey, Arc<Vec<f64>>>>,
    beam: Mutex<HashMap<BeamKey, Arc<Array2<f64>>>>,
}

impl KernelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn velocity_bins(&self, velocities: &[f64]) -> Result<Arc<VelocityBins>, AppError> {
        get_or_build(&self.bins, AxisKey::of(velocities), || VelocityBins::new(velocities))
    }

    /// Normalized `exp(-(v - v_c)² / lw²)` over the velocity axis, centered on
    /// channel `nv/2 - 1 + nv % 2`.
    pub fn spectral_kernel(&self, velocities: &[f64], line_width: f64) -> Result<Arc<Vec<f64>>, AppError> {
        if !(line_width.is_finite() && line_width > 0.0) {
            return Err(AppError::config(format!("Line width must be > 0, got {line_width}.")));
        }
        if velocities.is_empty() {
            return Err(AppError::data("Velocity axis is empty."));
        }
        let key = SpectralKey {
            axis: AxisKey::of(velocities),
            line_width: line_width.to_bits(),
        };
        get_or_build(&self.spectral, key, || {
            let nv = velocities.len();
            let vc = velocities[nv / 2 + nv % 2 - 1];
            let kernel: Vec<f64> = velocities
                .iter()
                .map(|v| (-(v - vc).powi(2) / line_width.powi(2)).exp())
                .collect();
            normalized(kernel, "spectral")
        })
    }

    /// Normalized elliptical Gaussian on the `(x, y)` mesh, rotated by the
    /// beam position angle relative to the cut.
    ///
    /// The mesh is taken relative to the sample at index `(n - 1) / 2` of each
    /// axis so the kernel peak sits on the same-mode convolution center.
    pub fn beam_kernel(
        &self,
        beam: &Beam,
        cut_position_angle: f64,
        x: &[f64],
        y: &[f64],
    ) -> Result<Arc<Array2<f64>>, AppError> {
        beam.validate()?;
        if x.is_empty() || y.is_empty() {
            return Err(AppError::data("Beam kernel needs non-empty spatial axes."));
        }
        let rotation = beam.pa - cut_position_angle;
        let key = BeamKey {
            major: beam.major.to_bits(),
            minor: beam.minor.to_bits(),
            rotation: rotation.to_bits(),
            x: AxisKey::of(x),
            y: AxisKey::of(y),
        };
        get_or_build(&self.beam, key, || {
            let theta = rotation.to_radians();
            let (sin, cos) = theta.sin_cos();
            let (x0, y0) = (x[(x.len() - 1) / 2], y[(y.len() - 1) / 2]);
            let sig_major = beam.major / 2.35;
            let sig_minor = beam.minor / 2.35;
            let kernel = Array2::from_shape_fn((x.len(), y.len()), |(i, j)| {
                let (xi, yj) = (x[i] - x0, y[j] - y0);
                let s = xi * cos - yj * sin;
                let t = xi * sin + yj * cos;
                (-0.5 * (t / sig_minor).powi(2) - 0.5 * (s / sig_major).powi(2)).exp()
            });
            let total = kernel.sum();
            if !(total.is_finite() && total > 0.0) {
                return Err(AppError::internal("Beam kernel sums to zero."));
            }
            Ok(kernel / total)
        })
    }

    pub fn counts(&self) -> CacheCounts {
        CacheCounts {
            bins: self.bins.lock().map_or(0, |m| m.len()),
            spectral: self.spectral.lock().map_or(0, |m| m.len()),
            beam: self.beam.lock().map_or(0, |m| m.len()),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.bins.lock() {
            m.clear();
        }
        if let Ok(mut m) = self.spectral.lock() {
            m.clear();
        }
        if let Ok(mut m) = self.beam.lock() {
            m.clear();
        }
    }
}

fn normalized(kernel: Vec<f64>, label: &str) -> Result<Vec<f64>, AppError> {
    let total: f64 = kernel.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(AppError::internal(format!("The {label} kernel sums to zero.")));
    }
    Ok(kernel.into_iter().map(|g| g / total).collect())
}

/// Look up `key`, building the value outside the lock on a miss.
fn get_or_build<K, V, F>(map: &Mutex<HashMap<K, Arc<V>>>, key: K, build: F) -> Result<Arc<V>, AppError>
where
    K: Eq + Hash + std::fmt::Debug,
    F: FnOnce() -> Result<V, AppError>,
{
    if let Some(hit) = map
        .lock()
        .map_err(|_| AppError::internal("Kernel cache lock poisoned."))?
        .get(&key)
    {
        return Ok(Arc::clone(hit));
    }
    let value = Arc::new(build()?);
    let mut guard = map
        .lock()
        .map_err(|_| AppError::internal("Kernel cache lock poisoned."))?;
    match guard.entry(key) {
        Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
        Entry::Vacant(entry) => {
            debug!(key = ?entry.key(), "kernel cache miss");
            Ok(Arc::clone(entry.insert(value)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: i32, step: f64) -> Vec<f64> {
        (-n..=n).map(|i| f64::from(i) * step).collect()
    }

    #[test]
    fn spectral_kernel_is_normalized_and_centered() {
        let v = axis(5, 0.5);
        let cache = KernelCache::new();
        let g = cache.spectral_kernel(&v, 1.0).unwrap();
        assert!((g.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        let peak = g.iter().cloned().fold(f64::MIN, f64::max);
        assert_eq!(g[5], peak);
    }

    #[test]
    fn even_axis_centers_below_middle() {
        let v: Vec<f64> = (0..6).map(f64::from).collect();
        let g = KernelCache::new().spectral_kernel(&v, 0.5).unwrap();
        let argmax = g
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        // nv / 2 - 1 + nv % 2 = 2.
        assert_eq!(argmax, Some(2));
    }

    #[test]
    fn beam_kernel_rotates_with_position_angle() {
        let cache = KernelCache::new();
        let x = axis(6, 1.0);
        let y = axis(6, 1.0);
        let beam = Beam::new(6.0, 2.0, 0.0).unwrap();
        let along = cache.beam_kernel(&beam, 0.0, &x, &y).unwrap();
        let across = cache.beam_kernel(&beam, 90.0, &x, &y).unwrap();
        assert!((along.sum() - 1.0).abs() < 1e-12);
        // Unrotated, the major axis lies along x.
        assert!(along[(9, 6)] > along[(6, 9)]);
        // Rotated by 90 degrees, it lies along y.
        assert!(across[(6, 9)] > across[(9, 6)]);
        assert!((along[(9, 6)] - across[(6, 9)]).abs() < 1e-12);
    }

    #[test]
    fn entries_are_keyed_by_their_parameters() {
        let cache = KernelCache::new();
        let v = axis(4, 1.0);
        let x = axis(3, 1.0);
        let beam = Beam::new(2.0, 1.0, 10.0).unwrap();

        let a = cache.spectral_kernel(&v, 1.0).unwrap();
        let b = cache.spectral_kernel(&v, 1.0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.spectral_kernel(&v, 2.0).unwrap();
        cache.beam_kernel(&beam, 0.0, &x, &x).unwrap();
        cache.beam_kernel(&beam, 0.0, &x, &x).unwrap();
        cache.beam_kernel(&beam, 45.0, &x, &x).unwrap();
        cache.velocity_bins(&v).unwrap();
        assert_eq!(
            cache.counts(),
            CacheCounts {
                bins: 1,
                spectral: 2,
                beam: 2
            }
        );
        cache.clear();
        assert_eq!(cache.counts(), CacheCounts::default());
    }

    #[test]
    fn invalid_line_width_is_a_config_error() {
        let err = KernelCache::new().spectral_kernel(&axis(2, 1.0), 0.0).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
