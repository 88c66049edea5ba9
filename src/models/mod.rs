//! Envelope physics: streamline solver, kinematics and frame geometry.
//!
//! Everything here is a small pure function of dimensionless coordinates so
//! the synthetic PV pipeline can evaluate it sample by sample in parallel.

pub mod constants;
pub mod envelope;
pub mod frame;
pub mod streamline;

pub use constants::*;
pub use envelope::{
    AxisExtrema, EnvelopeOptions, KinematicSample, SphericalVelocity, evaluate, kepler_velocity,
    velocity_density, velocity_density_many, velocity_extrema,
};
pub use frame::{
    Basis, ObserverFrame, SphericalSample, basis_vectors, envelope_from_observer, line_of_sight_velocity,
    project, spherical_from_cartesian,
};
pub use streamline::{StreamlineCase, StreamlineSolution};
