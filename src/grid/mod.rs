//! Multi-resolution sampling grid for the model cube.

pub mod nested;

pub use nested::{GridAxis, GridLevel, LevelBox, NestedGrid};
