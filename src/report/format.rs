//! Formatted terminal output.
//!
//! Formatting lives in one place so the model and fitting code stays free of
//! presentation details.

use crate::domain::{FitResult, ModelParameters};
use crate::grid::NestedGrid;
use crate::models::AxisExtrema;
use crate::pvd::ModelPv;
use crate::report::ResidualStats;

/// Fit-result table: best value and 16/50/84 percentiles per parameter.
pub fn format_fit_result(result: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:>12} {:>12} {:>12} {:>12} {:<6}\n",
        "param", "best", "p16", "p50", "p84", "unit"
    ));
    out.push_str(&format!(
        "{:-<10} {:-<12} {:-<12} {:-<12} {:-<12} {:-<6}\n",
        "", "", "", "", "", ""
    ));
    for e in &result.estimates {
        let fixed = e.low == e.high && e.best == e.mid;
        let line = format!(
            "{:<10} {:>12} {:>12} {:>12} {:>12} {:<6}{}",
            e.name.label(),
            fmt_num(e.best),
            fmt_num(e.low),
            fmt_num(e.mid),
            fmt_num(e.high),
            e.name.unit(),
            if fixed { " (fixed)" } else { "" }
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Residual statistics per fitted cut.
pub fn format_residuals(stats: &[ResidualStats]) -> String {
    let mut out = String::from("Residuals:\n");
    for s in stats {
        out.push_str(&format!(
            "- {:<5} n={} rms={} chi2/n={}\n",
            s.axis.name(),
            s.count,
            fmt_num(s.rms),
            fmt_num(s.reduced_chi2)
        ));
    }
    out
}

/// Velocity extrema (km/s) at every offset, one column pair per axis.
pub fn format_extrema(offsets: &[f64], extrema: &[AxisExtrema]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:>10}", "offset"));
    for e in extrema {
        out.push_str(&format!(" {:>10} {:>10}", format!("{}_min", e.axis), format!("{}_max", e.axis)));
    }
    out.push('\n');
    for (i, x) in offsets.iter().enumerate() {
        out.push_str(&format!("{x:>10.2}"));
        for e in extrema {
            out.push_str(&format!(" {:>10} {:>10}", fmt_opt(e.min.get(i)), fmt_opt(e.max.get(i))));
        }
        out.push('\n');
    }
    out
}

/// One line per generated cut: shape, peak and position angle.
pub fn format_mock_summary(pvs: &[ModelPv], params: &ModelParameters) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Model: Mstar={} Msun Rc={} au alpha={} incl={} deg frho={} ftau={}\n",
        fmt_num(params.stellar_mass),
        fmt_num(params.centrifugal_radius),
        fmt_num(params.alpha_infall),
        fmt_num(params.inclination),
        fmt_num(params.density_scale),
        fmt_num(params.optical_depth_scale),
    ));
    for pv in pvs {
        let (nv, nx) = pv.intensity.dim();
        let peak = pv.intensity.iter().copied().filter(|v| !v.is_nan()).fold(0.0, f64::max);
        out.push_str(&format!(
            "- {:<5} {}x{} peak={} pa={} deg\n",
            pv.axis.name(),
            nv,
            nx,
            fmt_num(peak),
            fmt_num(params.position_angle_for(pv.axis)),
        ));
    }
    out
}

/// Level layout of a nested grid.
pub fn format_grid(grid: &NestedGrid) -> String {
    let mut out = String::new();
    out.push_str(&format!("Nested grid: {} level(s)\n", grid.nlevels()));
    for level in grid.levels() {
        let [nx, ny, nz] = level.shape();
        out.push_str(&format!(
            "- level {}: {}x{}x{} cells, spacing=({}, {}, {}) au",
            level.index,
            nx,
            ny,
            nz,
            fmt_num(level.spacing[0]),
            fmt_num(level.spacing[1]),
            fmt_num(level.spacing[2]),
        ));
        if let (Some(parent), Some(cells)) = (level.parent, &level.parent_cells) {
            out.push_str(&format!(
                ", refine x{} in level {parent} cells x[{}..{}) y[{}..{}) z[{}..{})",
                level.refinement,
                cells[0].start,
                cells[0].end,
                cells[1].start,
                cells[1].end,
                cells[2].start,
                cells[2].end,
            ));
        }
        out.push('\n');
    }
    out
}

fn fmt_num(v: f64) -> String {
    if !v.is_finite() {
        return "nan".to_string();
    }
    let a = v.abs();
    if a != 0.0 && !(1e-3..1e5).contains(&a) {
        format!("{v:.4e}")
    } else {
        format!("{v:.4}")
    }
}

fn fmt_opt(v: Option<&f64>) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.3}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CutAxis, GridConfig, ParamEstimate, ParamName};
    use ndarray::array;

    #[test]
    fn fixed_rows_are_marked() {
        let estimates = ParamName::ALL
            .into_iter()
            .map(|name| match name {
                ParamName::Mstar => ParamEstimate {
                    name,
                    best: 0.41,
                    low: 0.38,
                    mid: 0.40,
                    high: 0.43,
                },
                _ => ParamEstimate::fixed(name, 1.0),
            })
            .collect();
        let text = format_fit_result(&FitResult { estimates });
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 9);
        assert!(lines[2].starts_with("Mstar"));
        assert!(lines[2].contains("0.4100") && lines[2].contains("Msun"));
        assert!(!lines[2].contains("(fixed)"));
        assert!(lines[3].ends_with("(fixed)"));
    }

    #[test]
    fn extrema_table_marks_undefined_values() {
        let extrema = vec![AxisExtrema {
            axis: CutAxis::Major,
            max: vec![1.0, f64::NAN],
            min: vec![-1.0],
        }];
        let text = format_extrema(&[0.0, 10.0], &extrema);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("major_min"));
        assert!(lines[1].contains("-1.000") && lines[1].contains("1.000"));
        assert!(lines[2].contains("NaN") && lines[2].contains('-'));
    }

    #[test]
    fn grid_summary_lists_every_level() {
        let axis: Vec<f64> = (-10..=10).map(f64::from).collect();
        let grid = NestedGrid::build(&axis, &axis, None, &GridConfig::default()).unwrap();
        let text = format_grid(&grid);
        assert!(text.starts_with("Nested grid: 3 level(s)"));
        assert!(text.contains("level 2:"));
        assert!(text.contains("refine x3 in level 1"));
    }

    #[test]
    fn mock_summary_reports_peak() {
        let pvs = vec![ModelPv {
            axis: CutAxis::Minor,
            intensity: array![[0.0, 0.5], [0.25, f64::NAN]],
        }];
        let text = format_mock_summary(&pvs, &ModelParameters::default());
        assert!(text.contains("minor 2x2 peak=0.5000 pa=90.0000 deg"));
    }

    #[test]
    fn numbers_switch_to_scientific_outside_range() {
        assert_eq!(fmt_num(123.456), "123.4560");
        assert_eq!(fmt_num(2.5e-5), "2.5000e-5");
        assert_eq!(fmt_num(f64::NAN), "nan");
    }
}
