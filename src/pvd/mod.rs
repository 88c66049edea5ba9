//! Synthetic PV pipeline: model fields, deposition, convolution, slicing.

pub mod cache;
pub mod deposit;
pub mod mock;

pub use cache::{CacheCounts, KernelCache};
pub use deposit::{VelocityBins, deposit, deposit_columns};
pub use mock::{MockPvd, ModelField, ModelPv};
