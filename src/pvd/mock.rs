//! Synthetic PV diagrams from the envelope model.
//!
//! `build` evaluates density and line-of-sight velocity on every grid level;
//! `generate_pvd` reduces such a field to a PV slice:
//!
//! 1. deposit density into the velocity channel containing each sample,
//! 2. integrate along the line of sight across the nested levels,
//! 3. convolve with the spectral kernel (optional),
//! 4. map optical depth to intensity, `I = 1 - exp(-τ / max τ · ftau)`,
//! 5. convolve with the beam (optional),
//! 6. take the transverse row through the center,
//! 7. average sub-pixels back onto the observed offsets.

use ndarray::{Array2, Array3, Axis, s};
use rayon::prelude::*;
use tracing::debug;

use crate::domain::{AxisSelection, Beam, CutAxis, GridConfig, ModelParameters};
use crate::error::AppError;
use crate::grid::{GridAxis, NestedGrid};
use crate::math::{convolve_axis0, convolve_planes, nan_max, nan_mean, subdivide, uniform_step};
use crate::models::{EnvelopeOptions, ObserverFrame, basis_vectors, evaluate, project, velocity_unit};
use crate::pvd::cache::KernelCache;
use crate::pvd::deposit::deposit_columns;

/// Density and line-of-sight velocity (km/s) on every grid level.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelField {
    pub axis: CutAxis,
    pub density: Vec<Array3<f64>>,
    pub velocity: Vec<Array3<f64>>,
}

impl ModelField {
    pub fn peak_density(&self) -> Option<f64> {
        nan_max(self.density.iter().flat_map(|d| d.iter()))
    }

    pub fn scale_density(&mut self, factor: f64) {
        for d in &mut self.density {
            d.mapv_inplace(|v| v * factor);
        }
    }
}

/// One model PV diagram, shaped (velocities × offsets).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPv {
    pub axis: CutAxis,
    pub intensity: Array2<f64>,
}

/// Mock PV generator bound to one offset/velocity sampling.
#[derive(Debug)]
pub struct MockPvd {
    offsets: Vec<f64>,
    velocities: Vec<f64>,
    nsubgrid: usize,
    beam: Option<Beam>,
    grid: NestedGrid,
    cache: KernelCache,
}

impl MockPvd {
    /// Lay out the grid for `offsets` (au) and `velocities` (km/s).
    ///
    /// Offsets are split into `config.nsubgrid` sub-pixels; the line-of-sight
    /// axis reuses the sub-pixel offsets.
    pub fn new(offsets: &[f64], velocities: &[f64], beam: Option<Beam>, config: &GridConfig) -> Result<Self, AppError> {
        if uniform_step(offsets, "Offset")? < 0.0 {
            return Err(AppError::config("Offset axis must be ascending."));
        }
        if let Some(beam) = &beam {
            beam.validate()?;
        }
        let cache = KernelCache::new();
        cache.velocity_bins(velocities)?;
        let x = subdivide(offsets, config.nsubgrid)?;
        let grid = NestedGrid::build(&x, &x, beam.map(|b| b.major), config)?;
        debug!(
            levels = grid.nlevels(),
            samples = grid.levels().iter().map(|l| l.len()).sum::<usize>(),
            "model grid ready"
        );
        Ok(Self {
            offsets: offsets.to_vec(),
            velocities: velocities.to_vec(),
            nsubgrid: config.nsubgrid,
            beam,
            grid,
            cache,
        })
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn velocities(&self) -> &[f64] {
        &self.velocities
    }

    pub fn grid(&self) -> &NestedGrid {
        &self.grid
    }

    pub fn cache(&self) -> &KernelCache {
        &self.cache
    }

    pub fn beam(&self) -> Option<Beam> {
        self.beam
    }

    /// Density and line-of-sight velocity along `axis`.
    ///
    /// Density is zero inside `inner_radius` and beyond `outer_radius` (au)
    /// and, with `normalize`, divided by its peak.
    pub fn build(&self, params: &ModelParameters, axis: CutAxis, normalize: bool) -> Result<ModelField, AppError> {
        params.validate()?;
        let rc = params.centrifugal_radius;
        let vunit = velocity_unit(params.stellar_mass, rc);
        let frame = ObserverFrame::new(params.inclination.to_radians(), 0.0);
        let los = frame.line_of_sight();
        let options = EnvelopeOptions {
            alpha_infall: params.alpha_infall,
            with_kepler: params.with_kepler,
            density_scale: params.density_scale,
        };

        let mut density = Vec::with_capacity(self.grid.nlevels());
        let mut velocity = Vec::with_capacity(self.grid.nlevels());
        for (k, level) in self.grid.levels().iter().enumerate() {
            let coords = self.grid.sample_coordinates(k, None)?;
            let (rho, vlos): (Vec<f64>, Vec<f64>) = coords
                .par_iter()
                .map(|p| {
                    let s = frame.to_spherical(axis.arrange(p[0] / rc, p[1] / rc, p[2] / rc));
                    let sample = evaluate(s.radius, s.theta, &options);
                    let v = project(&los, &basis_vectors(s.theta, s.phi), &sample.velocity) * vunit;
                    let r_au = s.radius * rc;
                    let outside = r_au <= params.inner_radius || params.outer_radius.is_some_and(|ro| r_au > ro);
                    (if outside { 0.0 } else { sample.density }, v)
                })
                .unzip();
            let [nx, ny, nz] = level.shape();
            density.push(to_cube((nx, ny, nz), rho)?);
            velocity.push(to_cube((nx, ny, nz), vlos)?);
        }

        let mut field = ModelField {
            axis,
            density,
            velocity,
        };
        if normalize {
            normalize_fields(std::slice::from_mut(&mut field));
        }
        Ok(field)
    }

    /// Reduce a model field to a PV diagram cut at `position_angle` (deg).
    ///
    /// The spectral kernel uses `params.line_width`, the beam kernel
    /// `params.beam` (falling back to the generator's beam) and the intensity
    /// mapping `params.optical_depth_scale`. Output values lie in `[0, 1)`.
    pub fn generate_pvd(
        &self,
        field: &ModelField,
        params: &ModelParameters,
        position_angle: f64,
    ) -> Result<Array2<f64>, AppError> {
        if field.density.len() != self.grid.nlevels() || field.velocity.len() != self.grid.nlevels() {
            return Err(AppError::internal(format!(
                "Model field has {} levels, grid has {}.",
                field.density.len(),
                self.grid.nlevels()
            )));
        }
        let bins = self.cache.velocity_bins(&self.velocities)?;

        let mut columns = Vec::with_capacity(self.grid.nlevels());
        for (k, level) in self.grid.levels().iter().enumerate() {
            let covered = self.grid.covered(k)?;
            columns.push(deposit_columns(
                &field.density[k],
                &field.velocity[k],
                &covered,
                &bins,
                level.spacing[GridAxis::Z.index()],
            )?);
        }
        let mut tau = self.grid.composite_columns(GridAxis::Z, columns)?;

        if let Some(width) = params.line_width {
            let kernel = self.cache.spectral_kernel(&self.velocities, width)?;
            tau = convolve_axis0(&tau, &kernel);
        }

        let mut intensity = match nan_max(tau.iter()) {
            Some(peak) if peak > 0.0 => {
                let scale = params.optical_depth_scale / peak;
                tau.mapv(|t| 1.0 - (-t * scale).exp())
            }
            _ => Array3::zeros(tau.raw_dim()),
        };
        intensity.mapv_inplace(clamp_intensity);

        if let Some(beam) = params.beam.or(self.beam) {
            let root = self.grid.root();
            let kernel = self.cache.beam_kernel(&beam, position_angle, &root.axes[0], &root.axes[1])?;
            intensity = convolve_planes(&intensity, &kernel);
            intensity.mapv_inplace(clamp_intensity);
        }

        let ny = self.grid.root().axes[1].len();
        let slice = intensity.index_axis(Axis(2), ny / 2).to_owned();
        Ok(self.bin_offsets(slice).mapv(clamp_intensity))
    }

    /// Mock PV diagram(s) for `selection`.
    ///
    /// With [`AxisSelection::Both`] both cuts are normalized by one shared
    /// peak density so their intensities stay comparable. Each cut is
    /// convolved at its own position angle.
    pub fn generate_mock_pvd(&self, params: &ModelParameters, selection: AxisSelection) -> Result<Vec<ModelPv>, AppError> {
        let fields = match selection {
            AxisSelection::Both => {
                let mut fields = selection
                    .axes()
                    .iter()
                    .map(|&axis| self.build(params, axis, false))
                    .collect::<Result<Vec<_>, _>>()?;
                normalize_fields(&mut fields);
                fields
            }
            _ => selection
                .axes()
                .iter()
                .map(|&axis| self.build(params, axis, true))
                .collect::<Result<Vec<_>, _>>()?,
        };
        fields
            .into_iter()
            .map(|field| {
                let intensity = self.generate_pvd(&field, params, params.position_angle_for(field.axis))?;
                Ok(ModelPv {
                    axis: field.axis,
                    intensity,
                })
            })
            .collect()
    }

    /// Average each run of `nsubgrid` sub-pixel columns.
    fn bin_offsets(&self, pv: Array2<f64>) -> Array2<f64> {
        let n = self.nsubgrid;
        if n <= 1 {
            return pv;
        }
        let (nv, nx) = pv.dim();
        Array2::from_shape_fn((nv, nx / n), |(v, j)| nan_mean(pv.slice(s![v, j * n..(j + 1) * n]).iter()))
    }
}

/// Largest f64 below one; `1 - exp(-x)` rounds to 1 for x above ~37.
const MAX_INTENSITY: f64 = 1.0 - f64::EPSILON / 2.0;

fn clamp_intensity(i: f64) -> f64 {
    i.clamp(0.0, MAX_INTENSITY)
}

/// Divide every field by the peak density across all of them.
fn normalize_fields(fields: &mut [ModelField]) {
    let peaks: Vec<f64> = fields.iter().filter_map(ModelField::peak_density).collect();
    if let Some(peak) = nan_max(&peaks).filter(|p| *p > 0.0) {
        for field in fields.iter_mut() {
            field.scale_density(1.0 / peak);
        }
    }
}

fn to_cube(shape: (usize, usize, usize), values: Vec<f64>) -> Result<Array3<f64>, AppError> {
    Array3::from_shape_vec(shape, values).map_err(|e| AppError::internal(format!("Model cube shape error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::nearest_index;
    use crate::models::velocity_extrema;

    fn axis(n: i32, step: f64) -> Vec<f64> {
        (-n..=n).map(|i| f64::from(i) * step).collect()
    }

    fn small_mock(beam: Option<Beam>) -> MockPvd {
        let config = GridConfig {
            refinement: vec![3],
            resolution_floor: 2,
            ..GridConfig::default()
        };
        MockPvd::new(&axis(12, 10.0), &axis(10, 0.4), beam, &config).unwrap()
    }

    fn params() -> ModelParameters {
        ModelParameters {
            stellar_mass: 0.5,
            centrifugal_radius: 50.0,
            inclination: 89.0,
            inner_radius: 1.0,
            outer_radius: Some(200.0),
            ..ModelParameters::default()
        }
    }

    #[test]
    fn intensity_stays_below_one() {
        let beam = Beam::new(20.0, 15.0, 30.0).unwrap();
        for (mock, line_width) in [(small_mock(None), None), (small_mock(Some(beam)), Some(0.5))] {
            let p = ModelParameters {
                line_width,
                ..params()
            };
            let out = mock.generate_mock_pvd(&p, AxisSelection::Major).unwrap();
            let pv = &out[0].intensity;
            assert_eq!(pv.dim(), (21, 25));
            assert!(pv.iter().all(|v| (0.0..1.0).contains(v)), "out of range");
            assert!(pv.iter().any(|v| *v > 0.0));
        }
    }

    #[test]
    fn saturated_optical_depth_stays_below_one() {
        let beam = Beam::new(20.0, 15.0, 30.0).unwrap();
        let p = ModelParameters {
            optical_depth_scale: 1000.0,
            ..params()
        };
        for (mock, saturated) in [(small_mock(None), 0.99), (small_mock(Some(beam)), 0.0)] {
            let out = mock.generate_mock_pvd(&p, AxisSelection::Major).unwrap();
            let pv = &out[0].intensity;
            assert!(pv.iter().all(|v| (0.0..1.0).contains(v)), "out of range");
            assert!(nan_max(pv.iter()).unwrap() > saturated);
        }
    }

    #[test]
    fn zero_velocity_field_fills_only_the_central_channel() {
        let mock = small_mock(None);
        let field = ModelField {
            axis: CutAxis::Major,
            density: mock
                .grid()
                .levels()
                .iter()
                .map(|l| {
                    let [nx, ny, nz] = l.shape();
                    Array3::from_elem((nx, ny, nz), 1.0)
                })
                .collect(),
            velocity: mock
                .grid()
                .levels()
                .iter()
                .map(|l| {
                    let [nx, ny, nz] = l.shape();
                    Array3::zeros((nx, ny, nz))
                })
                .collect(),
        };
        let pv = mock.generate_pvd(&field, &params(), 0.0).unwrap();
        let center = nearest_index(mock.velocities(), 0.0).unwrap();
        for (i, row) in pv.outer_iter().enumerate() {
            if i == center {
                assert!(row.iter().all(|v| *v > 0.0));
            } else {
                assert!(row.iter().all(|v| *v == 0.0), "channel {i} not empty");
            }
        }
    }

    #[test]
    fn kernels_are_cached_per_parameter_set() {
        let beam = Beam::new(20.0, 15.0, 30.0).unwrap();
        let mock = small_mock(Some(beam));
        let p = ModelParameters {
            line_width: Some(0.5),
            ..params()
        };
        mock.generate_mock_pvd(&p, AxisSelection::Major).unwrap();
        mock.generate_mock_pvd(&p, AxisSelection::Major).unwrap();
        let counts = mock.cache().counts();
        assert_eq!((counts.spectral, counts.beam), (1, 1));

        // The minor cut sits 90 degrees away: a new beam kernel.
        mock.generate_mock_pvd(&p, AxisSelection::Both).unwrap();
        assert_eq!(mock.cache().counts().beam, 2);

        let wider = ModelParameters {
            line_width: Some(0.8),
            ..p
        };
        mock.generate_mock_pvd(&wider, AxisSelection::Major).unwrap();
        assert_eq!(mock.cache().counts().spectral, 2);
    }

    #[test]
    fn both_axes_share_one_normalization() {
        let mock = small_mock(None);
        let p = params();
        let major = mock.build(&p, CutAxis::Major, false).unwrap();
        let minor = mock.build(&p, CutAxis::Minor, false).unwrap();
        let peak = major.peak_density().unwrap().max(minor.peak_density().unwrap());
        let mut fields = vec![major.clone(), minor];
        normalize_fields(&mut fields);
        let expected = major.peak_density().unwrap() / peak;
        assert!((fields[0].peak_density().unwrap() - expected).abs() < 1e-12);
        assert!(fields.iter().all(|f| f.peak_density().unwrap() <= 1.0 + 1e-12));

        let out = mock.generate_mock_pvd(&p, AxisSelection::Both).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].axis, CutAxis::Minor);
    }

    #[test]
    fn density_is_cut_at_inner_and_outer_radius() {
        let mock = small_mock(None);
        let p = ModelParameters {
            inner_radius: 40.0,
            outer_radius: Some(80.0),
            ..params()
        };
        let field = mock.build(&p, CutAxis::Major, true).unwrap();
        let root = mock.grid().root();
        for ((i, j, k), &rho) in field.density[0].indexed_iter() {
            let r = (root.axes[0][i].powi(2) + root.axes[1][j].powi(2) + root.axes[2][k].powi(2)).sqrt();
            if r <= 40.0 - 1e-9 || r > 80.0 + 1e-9 {
                assert_eq!(rho, 0.0, "r={r}");
            }
        }
        assert!((field.peak_density().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn subgrid_output_matches_observed_offsets() {
        let config = GridConfig {
            nsubgrid: 2,
            refinement: vec![],
            ..GridConfig::default()
        };
        let mock = MockPvd::new(&axis(6, 10.0), &axis(5, 0.5), None, &config).unwrap();
        assert_eq!(mock.grid().root().axes[0].len(), 26);
        let out = mock.generate_mock_pvd(&params(), AxisSelection::Minor).unwrap();
        assert_eq!(out[0].intensity.dim(), (11, 13));
    }

    #[test]
    fn model_never_exceeds_velocity_extrema_at_zero_offset() {
        let offsets = axis(20, 10.0);
        let velocities = axis(40, 0.2);
        let config = GridConfig {
            refinement: vec![3],
            resolution_floor: 2,
            ..GridConfig::default()
        };
        let mock = MockPvd::new(&offsets, &velocities, None, &config).unwrap();
        let p = ModelParameters {
            inner_radius: 50.0,
            ..params()
        };
        let extrema = velocity_extrema(&offsets, p.stellar_mass, p.centrifugal_radius, p.inclination).unwrap();
        let major = &extrema[0];
        assert_eq!(major.axis, CutAxis::Major);
        let c = nearest_index(&offsets, 0.0).unwrap();
        let bound = major.max[c].abs().max(major.min[c].abs());
        assert!(bound.is_finite());

        let out = mock.generate_mock_pvd(&p, AxisSelection::Major).unwrap();
        let pv = &out[0].intensity;
        let emitting: Vec<f64> = velocities
            .iter()
            .zip(pv.column(c))
            .filter(|(_, i)| **i > 0.0)
            .map(|(v, _)| v.abs())
            .collect();
        assert!(!emitting.is_empty());
        let fastest = emitting.iter().fold(0.0_f64, |m, v| m.max(*v));
        assert!(fastest <= bound + 0.2, "fastest={fastest} bound={bound}");
    }
}
