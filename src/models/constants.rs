//! Physical constants (SI) and the envelope velocity unit.

/// Gravitational constant (m³ kg⁻¹ s⁻²).
pub const G: f64 = 6.674_30e-11;

/// Solar mass (kg).
pub const M_SUN: f64 = 1.988_409_870_698_051e30;

/// Astronomical unit (m).
pub const AU: f64 = 1.495_978_707e11;

/// Floor applied to radii and |cos θ| so streamlines never become singular.
pub const EPSILON: f64 = 1e-10;

/// Keplerian speed at the centrifugal radius, in km/s.
///
/// All envelope velocities are dimensionless multiples of this unit.
pub fn velocity_unit(stellar_mass: f64, centrifugal_radius: f64) -> f64 {
    (G * stellar_mass * M_SUN / (centrifugal_radius * AU)).sqrt() * 1e-3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earth_orbital_speed() {
        // 1 Msun at 1 au is the Earth's orbital speed, ~29.78 km/s.
        let v = velocity_unit(1.0, 1.0);
        assert!((v - 29.78).abs() < 0.01, "got {v}");
    }
}
