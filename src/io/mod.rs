//! Input/output helpers.
//!
//! - fit-result table read/write (`fitres`)
//! - PV JSON read/write (`pvfile`)
//! - observed/model/residual CSV export (`export`)

pub mod export;
pub mod fitres;
pub mod pvfile;

pub use export::*;
pub use fitres::*;
pub use pvfile::*;
