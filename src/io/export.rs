//! Export observed / model / residual PV arrays to CSV.
//!
//! One row per (cut, velocity, offset) pixel, meant for plotting scripts or
//! spreadsheets. Undefined values are written as empty fields.

use std::path::Path;

use ndarray::Array2;

use crate::domain::CutAxis;
use crate::error::AppError;

pub const EXPORT_HEADER: [&str; 6] = ["axis", "offset", "velocity", "observed", "model", "residual"];

/// One cut to export; arrays are shaped (velocities × offsets).
#[derive(Debug, Clone, Copy)]
pub struct PvExport<'a> {
    pub axis: CutAxis,
    pub offsets: &'a [f64],
    pub velocities: &'a [f64],
    pub observed: Option<&'a Array2<f64>>,
    pub model: Option<&'a Array2<f64>>,
}

pub fn write_pv_csv(path: &Path, cuts: &[PvExport<'_>]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::config(format!("Failed to create export CSV '{}': {e}", path.display())))?;
    writer
        .write_record(EXPORT_HEADER)
        .map_err(|e| AppError::config(format!("Failed to write export CSV header: {e}")))?;

    for cut in cuts {
        let shape = (cut.velocities.len(), cut.offsets.len());
        for (label, array) in [("observed", cut.observed), ("model", cut.model)] {
            if let Some(a) = array {
                if a.dim() != shape {
                    return Err(AppError::internal(format!(
                        "The {label} array of the {} cut is {:?}, axes give {shape:?}.",
                        cut.axis,
                        a.dim()
                    )));
                }
            }
        }
        for (i, &v) in cut.velocities.iter().enumerate() {
            for (j, &x) in cut.offsets.iter().enumerate() {
                let obs = cut.observed.map(|a| a[(i, j)]);
                let model = cut.model.map(|a| a[(i, j)]);
                let residual = obs.zip(model).map(|(o, m)| o - m);
                writer
                    .write_record([
                        cut.axis.name().to_string(),
                        format!("{x:.6}"),
                        format!("{v:.6}"),
                        cell(obs),
                        cell(model),
                        cell(residual),
                    ])
                    .map_err(|e| AppError::config(format!("Failed to write export CSV row: {e}")))?;
            }
        }
    }
    writer
        .flush()
        .map_err(|e| AppError::config(format!("Failed to flush export CSV: {e}")))?;
    Ok(())
}

fn cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.6e}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rows_follow_velocity_then_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pv.csv");
        let observed = array![[1.0, f64::NAN], [3.0, 4.0]];
        let model = array![[0.5, 0.5], [1.0, 1.0]];
        let cut = PvExport {
            axis: CutAxis::Major,
            offsets: &[-5.0, 5.0],
            velocities: &[-1.0, 1.0],
            observed: Some(&observed),
            model: Some(&model),
        };
        write_pv_csv(&path, &[cut]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), EXPORT_HEADER.to_vec());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(&rows[1][0], "major");
        assert_eq!(rows[1][1].parse::<f64>().unwrap(), 5.0);
        assert_eq!(&rows[1][3], "");
        assert_eq!(&rows[1][5], "");
        assert_eq!(rows[2][5].parse::<f64>().unwrap(), 2.0);
    }

    #[test]
    fn model_only_export_leaves_observed_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock.csv");
        let model = array![[0.25]];
        let cut = PvExport {
            axis: CutAxis::Minor,
            offsets: &[0.0],
            velocities: &[0.0],
            observed: None,
            model: Some(&model),
        };
        write_pv_csv(&path, &[cut]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(1).unwrap(), "minor,0.000000,0.000000,,2.500000e-1,");
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model = array![[0.25, 0.5]];
        let cut = PvExport {
            axis: CutAxis::Major,
            offsets: &[0.0],
            velocities: &[0.0],
            observed: None,
            model: Some(&model),
        };
        let err = write_pv_csv(&dir.path().join("x.csv"), &[cut]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
