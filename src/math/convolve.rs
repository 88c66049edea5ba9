//! Direct "same"-mode convolution.
//!
//! Output has the input's shape and the kernel is centered on index
//! `(m - 1) / 2` of each kernel axis, matching the usual `mode="same"`
//! convention. Undefined input entries contribute nothing.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};

/// Convolve a 1D signal with a 1D kernel, same mode.
pub fn convolve_same_1d(signal: ArrayView1<'_, f64>, kernel: &[f64], mut out: ArrayViewMut1<'_, f64>) {
    let n = signal.len();
    let m = kernel.len();
    let off = (m.saturating_sub(1) / 2) as isize;
    for i in 0..n {
        let mut acc = 0.0;
        for (k, &a) in signal.iter().enumerate() {
            if a.is_nan() || a == 0.0 {
                continue;
            }
            let g = i as isize + off - k as isize;
            if g >= 0 && (g as usize) < m {
                acc += a * kernel[g as usize];
            }
        }
        out[i] = acc;
    }
}

/// Convolve every lane of `cube` along axis 0 (the velocity axis).
pub fn convolve_axis0(cube: &Array3<f64>, kernel: &[f64]) -> Array3<f64> {
    let mut out = Array3::<f64>::zeros(cube.raw_dim());
    Zip::from(out.lanes_mut(Axis(0)))
        .and(cube.lanes(Axis(0)))
        .par_for_each(|out_lane, in_lane| convolve_same_1d(in_lane, kernel, out_lane));
    out
}

/// Convolve a 2D plane with a 2D kernel, same mode.
pub fn convolve_same_2d(plane: ArrayView2<'_, f64>, kernel: ArrayView2<'_, f64>, mut out: ArrayViewMut2<'_, f64>) {
    let (n0, n1) = plane.dim();
    let (m0, m1) = kernel.dim();
    let off0 = (m0.saturating_sub(1) / 2) as isize;
    let off1 = (m1.saturating_sub(1) / 2) as isize;
    out.fill(0.0);
    for ((k0, k1), &a) in plane.indexed_iter() {
        if a.is_nan() || a == 0.0 {
            continue;
        }
        // out[i] receives a[k] * g[i + off - k]; loop over the kernel support.
        for g0 in 0..m0 {
            let i0 = g0 as isize - off0 + k0 as isize;
            if i0 < 0 || i0 as usize >= n0 {
                continue;
            }
            for g1 in 0..m1 {
                let i1 = g1 as isize - off1 + k1 as isize;
                if i1 < 0 || i1 as usize >= n1 {
                    continue;
                }
                out[(i0 as usize, i1 as usize)] += a * kernel[(g0, g1)];
            }
        }
    }
}

/// Convolve every plane of `cube` over axes (1, 2) with `kernel`.
pub fn convolve_planes(cube: &Array3<f64>, kernel: &Array2<f64>) -> Array3<f64> {
    let mut out = Array3::<f64>::zeros(cube.raw_dim());
    Zip::from(out.axis_iter_mut(Axis(0)))
        .and(cube.axis_iter(Axis(0)))
        .par_for_each(|out_plane, in_plane| convolve_same_2d(in_plane, kernel.view(), out_plane));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    #[test]
    fn centered_kernel_does_not_shift_odd() {
        let signal = array![0.0, 0.0, 1.0, 0.0, 0.0];
        let kernel = [0.25, 0.5, 0.25];
        let mut out = Array1::<f64>::zeros(5);
        convolve_same_1d(signal.view(), &kernel, out.view_mut());
        assert_eq!(out.to_vec(), vec![0.0, 0.25, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn even_kernel_centers_on_lower_middle() {
        // Kernel of length 4 peaks at index 1 = (4 - 1) / 2, so no shift.
        let signal = array![0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let kernel = [0.0, 1.0, 0.0, 0.0];
        let mut out = Array1::<f64>::zeros(6);
        convolve_same_1d(signal.view(), &kernel, out.view_mut());
        assert_eq!(out.to_vec(), signal.to_vec());
    }

    #[test]
    fn interior_mass_is_conserved() {
        let mut cube = Array3::<f64>::zeros((9, 2, 1));
        cube[(4, 0, 0)] = 2.0;
        cube[(4, 1, 0)] = f64::NAN;
        let kernel = [0.1, 0.2, 0.4, 0.2, 0.1];
        let out = convolve_axis0(&cube, &kernel);
        let total: f64 = out.index_axis(Axis(1), 0).sum();
        assert!((total - 2.0).abs() < 1e-12);
        assert!(out.index_axis(Axis(1), 1).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn plane_convolution_spreads_point_source() {
        let mut cube = Array3::<f64>::zeros((1, 5, 5));
        cube[(0, 2, 2)] = 1.0;
        let kernel = array![[0.0, 0.1, 0.0], [0.1, 0.6, 0.1], [0.0, 0.1, 0.0]];
        let out = convolve_planes(&cube, &kernel);
        assert!((out[(0, 2, 2)] - 0.6).abs() < 1e-12);
        assert!((out[(0, 1, 2)] - 0.1).abs() < 1e-12);
        assert!((out[(0, 2, 3)] - 0.1).abs() < 1e-12);
        assert!((out.sum() - 1.0).abs() < 1e-12);
    }
}
