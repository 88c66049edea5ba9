//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - cut-axis / axis-selection enums and the beam (`CutAxis`, `Beam`)
//! - per-evaluation model parameters (`ModelParameters`)
//! - fit outputs (`ParamEstimate`, `FitResult`)
//! - observed PV diagrams handed over by the data collaborator (`ObservedPv`)

pub mod observation;
pub mod types;

pub use observation::*;
pub use types::*;
