//! PV JSON files.
//!
//! A PV file carries one cut in physical units:
//!
//! - `axis`: `"major"` or `"minor"`
//! - `offsets` (au) and `velocities` (km/s)
//! - `data`: one row per velocity; undefined pixels are `null`
//! - `sigma`, `beam` (optional), `position_angle` (optional)
//! - `created`: RFC 3339 timestamp written by this tool (optional)

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::domain::{Beam, CutAxis, ObservedPv};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvFile {
    pub axis: CutAxis,
    pub offsets: Vec<f64>,
    pub velocities: Vec<f64>,
    pub data: Vec<Vec<Option<f64>>>,
    pub sigma: f64,
    #[serde(default)]
    pub beam: Option<Beam>,
    #[serde(default)]
    pub position_angle: Option<f64>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl PvFile {
    pub fn from_observed(pv: &ObservedPv) -> Self {
        let data = pv
            .data
            .outer_iter()
            .map(|row| row.iter().map(|v| v.is_finite().then_some(*v)).collect())
            .collect();
        Self {
            axis: pv.axis,
            offsets: pv.offsets.clone(),
            velocities: pv.velocities.clone(),
            data,
            sigma: pv.sigma,
            beam: pv.beam,
            position_angle: pv.position_angle,
            created: Some(Utc::now()),
        }
    }

    /// Validate and convert; axes are normalized to ascending order.
    pub fn into_observed(self) -> Result<ObservedPv, AppError> {
        let nv = self.data.len();
        let nx = self.data.first().map_or(0, Vec::len);
        if nv == 0 || nx == 0 {
            return Err(AppError::data("PV file contains no data."));
        }
        if self.data.iter().any(|row| row.len() != nx) {
            return Err(AppError::data("PV file rows have different lengths."));
        }
        let flat: Vec<f64> = self
            .data
            .into_iter()
            .flatten()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        let data = Array2::from_shape_vec((nv, nx), flat)
            .map_err(|e| AppError::data(format!("PV data shape error: {e}")))?;
        ObservedPv::new(
            self.axis,
            self.offsets,
            self.velocities,
            data,
            self.sigma,
            self.beam,
            self.position_angle,
        )
    }
}

pub fn write_pv_json(path: &Path, pv: &ObservedPv) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create PV file '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &PvFile::from_observed(pv))
        .map_err(|e| AppError::config(format!("Failed to write PV file: {e}")))?;
    Ok(())
}

pub fn read_pv_json(path: &Path) -> Result<ObservedPv, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open PV file '{}': {e}", path.display())))?;
    let pv: PvFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::config(format!("Invalid PV file '{}': {e}", path.display())))?;
    pv.into_observed()
}
