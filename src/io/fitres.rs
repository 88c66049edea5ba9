//! Fit-result table: `<prefix>.popt.txt`.
//!
//! ```text
//! # popt plow pmid phigh
//! Mstar 4.123e-1 3.9e-1 4.1e-1 4.3e-1
//! ...
//! ```
//!
//! One row per parameter in [`ParamName::ALL`] order. Readers take columns
//! 1..=4 by position and skip `#` lines, so the label column is informative
//! only.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::{FitResult, ParamEstimate, ParamName};
use crate::error::AppError;

pub const HEADER: &str = "# popt plow pmid phigh";

/// `<prefix>.popt.txt`
pub fn table_path(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".popt.txt");
    PathBuf::from(name)
}

pub fn write_fit_result(path: &Path, result: &FitResult) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create fit-result table '{}': {e}", path.display())))?;
    writeln!(file, "{HEADER}").map_err(|e| AppError::config(format!("Failed to write fit-result header: {e}")))?;
    for name in ParamName::ALL {
        let est = result
            .get(name)
            .ok_or_else(|| AppError::internal(format!("Fit result lacks parameter {}.", name.label())))?;
        writeln!(
            file,
            "{} {:.6e} {:.6e} {:.6e} {:.6e}",
            name.label(),
            est.best,
            est.low,
            est.mid,
            est.high
        )
        .map_err(|e| AppError::config(format!("Failed to write fit-result row: {e}")))?;
    }
    Ok(())
}

pub fn read_fit_result(path: &Path) -> Result<FitResult, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::config(format!("Failed to read fit-result table '{}': {e}", path.display())))?;
    parse_fit_result(&text)
}

/// Parse the table body; rows map to parameters by position.
pub fn parse_fit_result(text: &str) -> Result<FitResult, AppError> {
    let rows: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if rows.len() != ParamName::ALL.len() {
        return Err(AppError::config(format!(
            "Fit-result table has {} rows, expected {}.",
            rows.len(),
            ParamName::ALL.len()
        )));
    }

    let mut estimates = Vec::with_capacity(rows.len());
    for (line_no, (row, name)) in rows.iter().zip(ParamName::ALL).enumerate() {
        let fields: Vec<&str> = row.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(AppError::config(format!(
                "Fit-result row {} has {} columns, expected 5.",
                line_no + 1,
                fields.len()
            )));
        }
        let mut values = [0.0; 4];
        for (slot, field) in values.iter_mut().zip(&fields[1..5]) {
            *slot = field.parse::<f64>().map_err(|e| {
                AppError::config(format!("Invalid number '{field}' in fit-result row {}: {e}", line_no + 1))
            })?;
        }
        estimates.push(ParamEstimate {
            name,
            best: values[0],
            low: values[1],
            mid: values[2],
            high: values[3],
        });
    }
    Ok(FitResult { estimates })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FitResult {
        let estimates = ParamName::ALL
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let base = 0.1 + i as f64 * 12.345_678;
                ParamEstimate {
                    name,
                    best: base,
                    low: base - 0.05,
                    mid: base + 1e-4,
                    high: base + 0.07,
                }
            })
            .collect();
        FitResult { estimates }
    }

    #[test]
    fn table_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_path(&dir.path().join("run"));
        assert!(path.ends_with("run.popt.txt"));

        let result = sample();
        write_fit_result(&path, &result).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(HEADER));
        assert!(text.lines().nth(3).unwrap().starts_with("alpha "));

        let back = read_fit_result(&path).unwrap();
        for (a, b) in result.estimates.iter().zip(&back.estimates) {
            assert_eq!(a.name, b.name);
            for (x, y) in [(a.best, b.best), (a.low, b.low), (a.mid, b.mid), (a.high, b.high)] {
                assert!((x - y).abs() <= 1e-6 * x.abs().max(1.0), "{x} vs {y}");
            }
        }
    }

    #[test]
    fn labels_are_not_interpreted() {
        let mut text = String::from("# comment\n");
        for i in 0..7 {
            text.push_str(&format!("p{i} {i} 0 1 2\n"));
        }
        let result = parse_fit_result(&text).unwrap();
        assert_eq!(result.get(ParamName::LogFrho).unwrap().best, 5.0);
    }

    #[test]
    fn malformed_tables_are_config_errors() {
        assert_eq!(parse_fit_result("Mstar 1 2 3 4\n").unwrap_err().exit_code(), 2);
        let mut text = String::new();
        for _ in 0..7 {
            text.push_str("x 1 2 three 4\n");
        }
        assert_eq!(parse_fit_result(&text).unwrap_err().exit_code(), 2);
    }
}
