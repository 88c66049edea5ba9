//! Numerical utilities: uniform axes, NaN-aware reductions and convolution.

pub mod axis;
pub mod convolve;
pub mod stats;

pub use axis::*;
pub use convolve::*;
pub use stats::*;
