//! `pv-silhouette` library crate.
//!
//! Synthetic position-velocity (PV) diagrams of a rotating, infalling
//! protostellar envelope, and a likelihood for fitting them to observed cuts.
//! The binary (`pvsil`) is a thin wrapper around this library so that:
//!
//! - the model and fitting code is testable without spawning processes
//! - the generator can be embedded by other tools

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod grid;
pub mod io;
pub mod math;
pub mod models;
pub mod pvd;
pub mod report;
