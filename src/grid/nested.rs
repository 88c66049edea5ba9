//! Nested Cartesian grid with refinement toward the center.
//!
//! Level 0 spans the full field of view on the observation pixels. Every
//! further level covers a whole number of its parent's cells and splits each
//! of them into `n³` sub-cells, so child samples are the centers of those
//! sub-cells and the child spacing is the parent spacing divided by `n`.
//!
//! Levels live in one `Vec` and refer to their parent by index; a parent
//! always precedes its children. Reductions composite from the finest level
//! down: a parent cell covered by a child takes the child's value for that
//! cell and never contributes its own, so no stretch of a line of sight is
//! counted twice.

use std::ops::Range;

use ndarray::{Array2, Array3, Array4, Axis, Zip, s};

use crate::domain::GridConfig;
use crate::error::AppError;
use crate::math::uniform_step;

/// Explicit nested box per axis `(x, y, z)` in physical units.
///
/// `None` keeps the parent's full extent along that axis.
pub type LevelBox = [Option<(f64, f64)>; 3];

/// Grid axes: `X` along the cut, `Y` transverse, `Z` along the line of sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GridAxis {
    X,
    Y,
    Z,
}

impl GridAxis {
    pub fn index(self) -> usize {
        match self {
            GridAxis::X => 0,
            GridAxis::Y => 1,
            GridAxis::Z => 2,
        }
    }

    /// The two axes left after integrating along `self`, in order.
    pub fn others(self) -> (usize, usize) {
        match self {
            GridAxis::X => (1, 2),
            GridAxis::Y => (0, 2),
            GridAxis::Z => (0, 1),
        }
    }

    fn column(self, idx: [usize; 3]) -> (usize, usize) {
        let (a, b) = self.others();
        (idx[a], idx[b])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridLevel {
    pub index: usize,
    pub parent: Option<usize>,
    /// Sub-cells per parent cell along each axis (1 for level 0).
    pub refinement: usize,
    /// Parent cells covered by this level, per axis.
    pub parent_cells: Option<[Range<usize>; 3]>,
    pub axes: [Vec<f64>; 3],
    pub spacing: [f64; 3],
}

impl GridLevel {
    pub fn shape(&self) -> [usize; 3] {
        [self.axes[0].len(), self.axes[1].len(), self.axes[2].len()]
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell-edge bounds of the level along `axis`.
    pub fn extent(&self, axis: usize) -> (f64, f64) {
        let values = &self.axes[axis];
        let half = 0.5 * self.spacing[axis];
        (values[0] - half, values[values.len() - 1] + half)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NestedGrid {
    levels: Vec<GridLevel>,
}

impl NestedGrid {
    /// Build the level hierarchy over a cut axis and a line-of-sight axis.
    ///
    /// The transverse axis is synthesized on the cut spacing: ±3σ of the
    /// beam major axis when `beam_major` is given, three samples otherwise.
    pub fn build(
        cut: &[f64],
        los: &[f64],
        beam_major: Option<f64>,
        config: &GridConfig,
    ) -> Result<Self, AppError> {
        let dx = uniform_step(cut, "Cut")?;
        let dz = uniform_step(los, "Line-of-sight")?;
        if dx < 0.0 || dz < 0.0 {
            return Err(AppError::config("Grid axes must be ascending."));
        }
        if config.level_boxes.as_ref().is_some_and(|b| b.len() != config.refinement.len()) {
            return Err(AppError::config(format!(
                "Got {} nested boxes for {} refinement factors.",
                config.level_boxes.as_ref().map_or(0, Vec::len),
                config.refinement.len()
            )));
        }
        if config.resolution_floor == 0 {
            return Err(AppError::config("Resolution floor must be >= 1."));
        }

        let root = GridLevel {
            index: 0,
            parent: None,
            refinement: 1,
            parent_cells: None,
            axes: [cut.to_vec(), transverse_axis(dx, beam_major)?, los.to_vec()],
            spacing: [dx, dx, dz],
        };
        let mut levels = vec![root];

        for (i, &factor) in config.refinement.iter().enumerate() {
            if factor == 0 {
                return Err(AppError::config(format!(
                    "Refinement factor of level {} must be >= 1.",
                    i + 1
                )));
            }
            let parent = &levels[i];
            let cells = match &config.level_boxes {
                Some(boxes) => snap_box(parent, &boxes[i])?,
                None => auto_box(parent, factor, config.resolution_floor),
            };
            let level = refine(parent, cells, factor);
            levels.push(level);
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn nlevels(&self) -> usize {
        self.levels.len()
    }

    pub fn root(&self) -> &GridLevel {
        &self.levels[0]
    }

    pub fn level(&self, index: usize) -> Result<&GridLevel, AppError> {
        self.levels.get(index).ok_or_else(|| {
            AppError::internal(format!(
                "Grid level {index} requested but the grid has {} levels.",
                self.levels.len()
            ))
        })
    }

    fn children(&self, index: usize) -> impl Iterator<Item = &GridLevel> {
        self.levels.iter().filter(move |l| l.parent == Some(index))
    }

    /// Flattened `(x, y, z)` samples of one level in row-major order,
    /// optionally passed through `transform`.
    pub fn sample_coordinates(
        &self,
        level: usize,
        transform: Option<&dyn Fn([f64; 3]) -> [f64; 3]>,
    ) -> Result<Vec<[f64; 3]>, AppError> {
        let level = self.level(level)?;
        let [x, y, z] = &level.axes;
        let mut out = Vec::with_capacity(level.len());
        for &xi in x {
            for &yi in y {
                for &zi in z {
                    let p = [xi, yi, zi];
                    out.push(match transform {
                        Some(f) => f(p),
                        None => p,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Cells of `level` that a finer level takes over.
    pub fn covered(&self, level: usize) -> Result<Array3<bool>, AppError> {
        let [nx, ny, nz] = self.level(level)?.shape();
        let mut mask = Array3::from_elem((nx, ny, nz), false);
        for child in self.children(level) {
            if let Some([rx, ry, rz]) = &child.parent_cells {
                mask.slice_mut(s![rx.clone(), ry.clone(), rz.clone()]).fill(true);
            }
        }
        Ok(mask)
    }

    /// Composite per-level column integrals into one map at level-0 resolution.
    ///
    /// `columns[k]` is shaped `(channels, a, b)` over the two axes other than
    /// `axis` and must hold the integral over the cells of level `k` that no
    /// child covers. Each child map is averaged over its `n × n` transverse
    /// blocks and added to the parent columns it covers, finest level first.
    pub fn composite_columns(&self, axis: GridAxis, mut columns: Vec<Array3<f64>>) -> Result<Array3<f64>, AppError> {
        if columns.len() != self.levels.len() {
            return Err(AppError::internal(format!(
                "Got column maps for {} levels, grid has {}.",
                columns.len(),
                self.levels.len()
            )));
        }
        let (a, b) = axis.others();
        for (k, level) in self.levels.iter().enumerate() {
            let shape = level.shape();
            let dim = columns[k].dim();
            if (dim.1, dim.2) != (shape[a], shape[b]) || dim.0 != columns[0].dim().0 {
                return Err(AppError::internal(format!(
                    "Column map of level {k} has shape {dim:?}, expected (_, {}, {}).",
                    shape[a], shape[b]
                )));
            }
        }

        for k in (1..self.levels.len()).rev() {
            let level = &self.levels[k];
            let (Some(parent), Some(cells)) = (level.parent, &level.parent_cells) else {
                continue;
            };
            let n = level.refinement;
            let (head, tail) = columns.split_at_mut(k);
            let child = &tail[0];
            let (nc, ca, cb) = child.dim();
            let mut block = Array3::<f64>::zeros((nc, ca / n, cb / n));
            for ((c, i, j), &v) in child.indexed_iter() {
                block[(c, i / n, j / n)] += v;
            }
            block.mapv_inplace(|v| v / (n * n) as f64);

            let target = &mut head[parent];
            let mut view = target.slice_mut(s![.., cells[a].clone(), cells[b].clone()]);
            view += &block;
        }
        Ok(columns.swap_remove(0))
    }

    /// Line-integrate per-level multi-channel fields `(channels, x, y, z)`
    /// along `axis`; undefined values count as zero.
    pub fn integrate_channels(&self, fields: &[Array4<f64>], axis: GridAxis) -> Result<Array3<f64>, AppError> {
        if fields.len() != self.levels.len() {
            return Err(AppError::internal(format!(
                "Got fields for {} levels, grid has {}.",
                fields.len(),
                self.levels.len()
            )));
        }
        let (a, b) = axis.others();
        let mut columns = Vec::with_capacity(fields.len());
        for (k, (level, field)) in self.levels.iter().zip(fields).enumerate() {
            let shape = level.shape();
            let (nc, fx, fy, fz) = field.dim();
            if [fx, fy, fz] != shape {
                return Err(AppError::internal(format!(
                    "Field of level {k} has shape {:?}, expected (_, {:?}).",
                    field.dim(),
                    shape
                )));
            }
            let covered = self.covered(k)?;
            let step = level.spacing[axis.index()];
            let mut sums = Array3::<f64>::zeros((nc, shape[a], shape[b]));
            for ((c, i, j, l), &v) in field.indexed_iter() {
                if v.is_nan() || covered[(i, j, l)] {
                    continue;
                }
                let (p, q) = axis.column([i, j, l]);
                sums[(c, p, q)] += v * step;
            }
            columns.push(sums);
        }
        self.composite_columns(axis, columns)
    }

    /// Single-channel form of [`NestedGrid::integrate_channels`].
    pub fn integrate_along(&self, fields: &[Array3<f64>], axis: GridAxis) -> Result<Array2<f64>, AppError> {
        let lifted: Vec<Array4<f64>> = fields.iter().map(|f| f.clone().insert_axis(Axis(0))).collect();
        let out = self.integrate_channels(&lifted, axis)?;
        Ok(out.index_axis_move(Axis(0), 0))
    }

    /// Down-sample every level onto level 0 by averaging the defined values of
    /// each `n³` block, finest level first.
    pub fn collapse(&self, fields: &[Array3<f64>]) -> Result<Array3<f64>, AppError> {
        if fields.len() != self.levels.len() {
            return Err(AppError::internal(format!(
                "Got fields for {} levels, grid has {}.",
                fields.len(),
                self.levels.len()
            )));
        }
        let mut out: Vec<Array3<f64>> = fields.to_vec();
        for (k, level) in self.levels.iter().enumerate() {
            let [nx, ny, nz] = level.shape();
            if out[k].dim() != (nx, ny, nz) {
                return Err(AppError::internal(format!(
                    "Field of level {k} has shape {:?}, expected {:?}.",
                    out[k].dim(),
                    level.shape()
                )));
            }
        }
        for k in (1..self.levels.len()).rev() {
            let level = &self.levels[k];
            let (Some(parent), Some([rx, ry, rz])) = (level.parent, &level.parent_cells) else {
                continue;
            };
            let n = level.refinement;
            let (head, tail) = out.split_at_mut(k);
            let child = &tail[0];
            let (cx, cy, cz) = child.dim();
            let mut sum = Array3::<f64>::zeros((cx / n, cy / n, cz / n));
            let mut count = Array3::<usize>::zeros((cx / n, cy / n, cz / n));
            for ((i, j, l), &v) in child.indexed_iter() {
                if v.is_nan() {
                    continue;
                }
                sum[(i / n, j / n, l / n)] += v;
                count[(i / n, j / n, l / n)] += 1;
            }
            let mean = Zip::from(&sum)
                .and(&count)
                .map_collect(|&s, &c| if c == 0 { f64::NAN } else { s / c as f64 });
            head[parent]
                .slice_mut(s![rx.clone(), ry.clone(), rz.clone()])
                .assign(&mean);
        }
        Ok(out.swap_remove(0))
    }
}

/// `(-m-1 ..= m+1) · dx` with `m = floor(3σ / dx)` of the beam major axis.
fn transverse_axis(dx: f64, beam_major: Option<f64>) -> Result<Vec<f64>, AppError> {
    match beam_major {
        Some(bmaj) => {
            if !(bmaj.is_finite() && bmaj > 0.0) {
                return Err(AppError::config(format!("Beam major axis must be > 0, got {bmaj}.")));
            }
            let m = (bmaj / dx * 3.0 / 2.35) as i64;
            Ok((-m - 1..=m + 1).map(|i| i as f64 * dx).collect())
        }
        None => Ok(vec![-dx, 0.0, dx]),
    }
}

/// Centered span of parent cells for an automatic box.
///
/// Along the cut and line-of-sight axes the box keeps every level at about
/// the parent's sample count (`ceil(n / factor)` cells), but never fewer than
/// `2 · floor` cells. The transverse axis shrinks the same way down to one
/// cell. Spans take the parity of the parent count so the box stays centered.
fn auto_box(parent: &GridLevel, factor: usize, floor: usize) -> [Range<usize>; 3] {
    let shape = parent.shape();
    let span = |n: usize, min: usize| -> Range<usize> {
        let mut w = n.div_ceil(factor).max(min).min(n);
        if w % 2 != n % 2 {
            w = (w + 1).min(n);
        }
        let start = (n - w) / 2;
        start..start + w
    };
    [
        span(shape[0], 2 * floor),
        span(shape[1], 1),
        span(shape[2], 2 * floor),
    ]
}

/// Parent cells whose centers fall inside an explicit box.
fn snap_box(parent: &GridLevel, bounds: &LevelBox) -> Result<[Range<usize>; 3], AppError> {
    let mut out: [Range<usize>; 3] = [0..0, 0..0, 0..0];
    for (axis, slot) in out.iter_mut().enumerate() {
        let values = &parent.axes[axis];
        let Some((lo, hi)) = bounds[axis] else {
            *slot = 0..values.len();
            continue;
        };
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(AppError::config(format!(
                "Nested box [{lo}, {hi}] on axis {axis} of level {} is not a valid range.",
                parent.index + 1
            )));
        }
        let (edge_lo, edge_hi) = parent.extent(axis);
        if lo < edge_lo || hi > edge_hi {
            return Err(AppError::config(format!(
                "Nested box [{lo}, {hi}] on axis {axis} of level {} is not contained in its parent [{edge_lo}, {edge_hi}].",
                parent.index + 1
            )));
        }
        let start = values.iter().position(|&v| v >= lo);
        let end = values.iter().rposition(|&v| v <= hi);
        match (start, end) {
            (Some(s0), Some(e0)) if s0 <= e0 => *slot = s0..e0 + 1,
            _ => {
                return Err(AppError::config(format!(
                    "Nested box [{lo}, {hi}] on axis {axis} of level {} contains no parent cell.",
                    parent.index + 1
                )));
            }
        }
    }
    Ok(out)
}

fn refine(parent: &GridLevel, cells: [Range<usize>; 3], factor: usize) -> GridLevel {
    let sub = |axis: usize| -> Vec<f64> {
        let h = parent.spacing[axis];
        let step = h / factor as f64;
        cells[axis]
            .clone()
            .flat_map(|c| {
                let edge = parent.axes[axis][c] - 0.5 * h;
                (0..factor).map(move |s| edge + (s as f64 + 0.5) * step)
            })
            .collect()
    };
    let axes = [sub(0), sub(1), sub(2)];
    let f = factor as f64;
    GridLevel {
        index: parent.index + 1,
        parent: Some(parent.index),
        refinement: factor,
        axes,
        spacing: [parent.spacing[0] / f, parent.spacing[1] / f, parent.spacing[2] / f],
        parent_cells: Some(cells),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize, step: f64) -> Vec<f64> {
        let half = (n as f64 - 1.0) / 2.0;
        (0..n).map(|i| (i as f64 - half) * step).collect()
    }

    fn grid(levels: usize) -> NestedGrid {
        let config = GridConfig {
            refinement: vec![3; levels - 1],
            resolution_floor: 2,
            ..GridConfig::default()
        };
        NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), Some(3.0), &config).unwrap()
    }

    fn fill(grid: &NestedGrid, f: impl Fn([f64; 3]) -> f64) -> Vec<Array3<f64>> {
        grid.levels()
            .iter()
            .map(|l| {
                let [nx, ny, nz] = l.shape();
                Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| f([l.axes[0][i], l.axes[1][j], l.axes[2][k]]))
            })
            .collect()
    }

    #[test]
    fn transverse_axis_spans_three_sigma() {
        // floor(3 * 3 / 2.35) = 3 -> 2 * 3 + 3 samples.
        let g = grid(1);
        assert_eq!(g.root().axes[1].len(), 9);
        let no_beam = NestedGrid::build(&axis(5, 1.0), &axis(5, 1.0), None, &GridConfig::default()).unwrap();
        assert_eq!(no_beam.root().axes[1], vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn automatic_boxes_are_centered_and_nested() {
        let g = grid(3);
        assert_eq!(g.nlevels(), 3);
        let l1 = &g.levels()[1];
        let [rx, ry, rz] = l1.parent_cells.clone().unwrap();
        // 21 cells / 3 = 7, odd like the parent.
        assert_eq!(rx, 7..14);
        assert_eq!(ry, 3..6);
        // 15 / 3 = 5 cells, above the floor of 2 * 2.
        assert_eq!(rz, 5..10);
        assert_eq!(l1.shape(), [21, 9, 15]);
        for level in &g.levels()[1..] {
            let parent = &g.levels()[level.parent.unwrap()];
            for a in 0..3 {
                let (lo, hi) = level.extent(a);
                let (plo, phi) = parent.extent(a);
                assert!(lo >= plo - 1e-12 && hi <= phi + 1e-12);
                assert!((level.spacing[a] * 3.0 - parent.spacing[a]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn constant_field_integrates_to_path_length() {
        for levels in [2, 3] {
            let g = grid(levels);
            let c = 2.5;
            let fields = fill(&g, |_| c);
            let (lo, hi) = g.root().extent(2);
            let out = g.integrate_along(&fields, GridAxis::Z).unwrap();
            assert_eq!(out.dim(), (21, 9));
            for v in out.iter() {
                assert!((v - c * (hi - lo)).abs() < 1e-9, "levels={levels} got {v}");
            }
            let (xlo, xhi) = g.root().extent(0);
            let across = g.integrate_along(&fields, GridAxis::X).unwrap();
            assert_eq!(across.dim(), (9, 15));
            assert!(across.iter().all(|v| (v - c * (xhi - xlo)).abs() < 1e-9));
        }
    }

    #[test]
    fn linear_field_matches_single_level_integral() {
        let coarse = grid(1);
        let fine = grid(3);
        let f = |p: [f64; 3]| 1.0 + 0.3 * p[2] + 0.1 * p[0];
        let a = coarse.integrate_along(&fill(&coarse, f), GridAxis::Z).unwrap();
        let b = fine.integrate_along(&fill(&fine, f), GridAxis::Z).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9, "{x} vs {y}");
        }
    }

    #[test]
    fn undefined_values_count_as_zero() {
        let g = grid(2);
        let mut fields = fill(&g, |_| 1.0);
        fields[0].fill(f64::NAN);
        fields[1].fill(f64::NAN);
        let out = g.integrate_along(&fields, GridAxis::Z).unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn channels_integrate_independently() {
        let g = grid(2);
        let fields: Vec<Array4<f64>> = fill(&g, |_| 1.0)
            .into_iter()
            .map(|f| ndarray::stack(Axis(0), &[f.view(), (f.clone() * 2.0).view()]).unwrap())
            .collect();
        let out = g.integrate_channels(&fields, GridAxis::Z).unwrap();
        assert_eq!(out.dim(), (2, 21, 9));
        assert!((out[(1, 10, 4)] - 2.0 * out[(0, 10, 4)]).abs() < 1e-9);
    }

    #[test]
    fn collapse_replaces_covered_cells_with_child_mean() {
        let g = grid(3);
        let ones = fill(&g, |_| 1.0);
        assert!(g.collapse(&ones).unwrap().iter().all(|v| (v - 1.0).abs() < 1e-12));

        let mut fields = fill(&g, |_| 0.0);
        fields[2].fill(4.0);
        let out = g.collapse(&fields).unwrap();
        assert_eq!(out.dim(), (21, 9, 15));
        // The central coarse cell lies entirely under the finest box.
        assert!((out[(10, 4, 7)] - 4.0).abs() < 1e-12);
        // Its neighbour along x is two thirds covered.
        assert!((out[(9, 4, 7)] - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(out[(0, 0, 0)], 0.0);
    }

    #[test]
    fn explicit_boxes_are_validated() {
        let base = GridConfig {
            refinement: vec![2],
            level_boxes: Some(vec![[Some((-3.0, 3.0)), None, Some((-4.0, 4.0))]]),
            ..GridConfig::default()
        };
        let g = NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), None, &base).unwrap();
        let [rx, ry, rz] = g.levels()[1].parent_cells.clone().unwrap();
        assert_eq!(rx, 7..14);
        assert_eq!(ry, 0..3);
        assert_eq!(rz, 5..10);

        let outside = GridConfig {
            level_boxes: Some(vec![[Some((-30.0, 3.0)), None, None]]),
            ..base.clone()
        };
        let err = NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), None, &outside).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        // Past the parent's outer cell edge by less than half a cell.
        let overhang = GridConfig {
            level_boxes: Some(vec![[Some((-10.8, 3.0)), None, None]]),
            ..base.clone()
        };
        let err = NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), None, &overhang).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let flush = GridConfig {
            level_boxes: Some(vec![[Some((-10.5, 10.5)), None, None]]),
            ..base.clone()
        };
        let g = NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), None, &flush).unwrap();
        assert_eq!(g.levels()[1].parent_cells.clone().unwrap()[0], 0..21);

        let mismatched = GridConfig {
            refinement: vec![2, 2],
            ..base.clone()
        };
        let err = NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), None, &mismatched).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let zero = GridConfig {
            refinement: vec![0],
            level_boxes: None,
            ..base
        };
        assert!(NestedGrid::build(&axis(21, 1.0), &axis(15, 2.0), None, &zero).is_err());
    }

    #[test]
    fn sample_coordinates_apply_transform() {
        let g = grid(2);
        let raw = g.sample_coordinates(1, None).unwrap();
        assert_eq!(raw.len(), g.levels()[1].len());
        let double = |p: [f64; 3]| [2.0 * p[0], p[1], p[2]];
        let transform: &dyn Fn([f64; 3]) -> [f64; 3] = &double;
        let doubled = g.sample_coordinates(1, Some(transform)).unwrap();
        assert_eq!(doubled[5][0], 2.0 * raw[5][0]);
        assert!(g.sample_coordinates(7, None).is_err());
    }
}
