//! Observer frame <-> envelope frame geometry.
//!
//! Observer coordinates are `(X, Y, Z)`: `X` and `Y` span the sky plane and
//! `Z` runs along the line of sight. The envelope frame is a right-handed
//! Cartesian frame whose `z` axis is the rotation axis, with spherical
//! coordinates `(r, θ, φ)`:
//!
//! ```text
//! r = |x|,  θ = arccos(z / r),  φ = atan2(x, -y)
//! e_r = ( sinθ sinφ, -sinθ cosφ,  cosθ)
//! e_θ = ( cosθ sinφ, -cosθ cosφ, -sinθ)
//! e_φ = ( cosφ,       sinφ,       0   )
//! ```
//!
//! An observer triple is carried into the envelope frame as
//! `X e_φ - Y e_θ + Z e_r` with the basis evaluated at `(i, φ₀)`, so the line
//! of sight is `e_r(i, φ₀)`.

use nalgebra::Vector3;

use crate::models::constants::EPSILON;
use crate::models::envelope::{self, SphericalVelocity};

/// Envelope-frame spherical coordinates; `radius` in units of Rc.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalSample {
    pub radius: f64,
    pub theta: f64,
    pub phi: f64,
}

/// Local orthonormal basis at one `(θ, φ)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub e_r: Vector3<f64>,
    pub e_theta: Vector3<f64>,
    pub e_phi: Vector3<f64>,
}

/// Cartesian envelope coordinates to spherical; the radius is floored at ε.
pub fn spherical_from_cartesian(x: f64, y: f64, z: f64) -> SphericalSample {
    let radius = (x * x + y * y + z * z).sqrt().max(EPSILON);
    SphericalSample {
        radius,
        theta: (z / radius).clamp(-1.0, 1.0).acos(),
        phi: x.atan2(-y),
    }
}

pub fn basis_vectors(theta: f64, phi: f64) -> Basis {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    Basis {
        e_r: Vector3::new(st * sp, -st * cp, ct),
        e_theta: Vector3::new(ct * sp, -ct * cp, -st),
        e_phi: Vector3::new(cp, sp, 0.0),
    }
}

/// Rotation from observer coordinates into the envelope frame.
///
/// Holds the basis at `(inclination, φ₀)` so that per-sample transforms do
/// not recompute trigonometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverFrame {
    basis: Basis,
}

impl ObserverFrame {
    /// `inclination` and `phi0` in radians.
    pub fn new(inclination: f64, phi0: f64) -> Self {
        Self {
            basis: basis_vectors(inclination, phi0),
        }
    }

    pub fn to_envelope(&self, xyz: [f64; 3]) -> Vector3<f64> {
        let [x, y, z] = xyz;
        self.basis.e_phi * x - self.basis.e_theta * y + self.basis.e_r * z
    }

    /// Observer triple straight to envelope spherical coordinates.
    pub fn to_spherical(&self, xyz: [f64; 3]) -> SphericalSample {
        let v = self.to_envelope(xyz);
        spherical_from_cartesian(v.x, v.y, v.z)
    }

    /// Line-of-sight unit vector in the envelope frame.
    pub fn line_of_sight(&self) -> Vector3<f64> {
        self.basis.e_r
    }
}

/// One-shot form of [`ObserverFrame::to_envelope`]; angles in radians.
pub fn envelope_from_observer(inclination: f64, phi0: f64, xyz: [f64; 3]) -> Vector3<f64> {
    ObserverFrame::new(inclination, phi0).to_envelope(xyz)
}

/// `-(v_r e_r + v_θ e_θ + v_φ e_φ) · los`.
pub fn project(los: &Vector3<f64>, basis: &Basis, v: &SphericalVelocity) -> f64 {
    -(v.r * basis.e_r.dot(los) + v.theta * basis.e_theta.dot(los) + v.phi * basis.e_phi.dot(los))
}

/// Line-of-sight velocity of the pure infall or pure Kepler solution.
pub fn line_of_sight_velocity(los: &Vector3<f64>, sample: &SphericalSample, use_kepler: bool) -> f64 {
    let v = if use_kepler {
        envelope::kepler_velocity(sample.radius, sample.theta)
    } else {
        envelope::velocity_density(sample.radius, sample.theta).velocity
    };
    project(los, &basis_vectors(sample.theta, sample.phi), &v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn basis_is_orthonormal() {
        for &(t, p) in &[(0.3, 1.1), (FRAC_PI_2, 0.0), (2.5, -2.0)] {
            let b = basis_vectors(t, p);
            for v in [b.e_r, b.e_theta, b.e_phi] {
                assert!((v.norm() - 1.0).abs() < 1e-12);
            }
            assert!(b.e_r.dot(&b.e_theta).abs() < 1e-12);
            assert!(b.e_r.dot(&b.e_phi).abs() < 1e-12);
            assert!(b.e_theta.dot(&b.e_phi).abs() < 1e-12);
            // Right-handed: e_r x e_θ = e_φ.
            assert!((b.e_r.cross(&b.e_theta) - b.e_phi).norm() < 1e-12);
        }
    }

    #[test]
    fn spherical_recovers_radial_direction() {
        let (t, p, r) = (1.2, 0.7, 3.5);
        let x = basis_vectors(t, p).e_r * r;
        let s = spherical_from_cartesian(x.x, x.y, x.z);
        assert!((s.radius - r).abs() < 1e-12);
        assert!((s.theta - t).abs() < 1e-12);
        assert!((s.phi - p).abs() < 1e-12);
    }

    #[test]
    fn origin_radius_is_floored() {
        let s = spherical_from_cartesian(0.0, 0.0, 0.0);
        assert_eq!(s.radius, EPSILON);
        assert!(s.theta.is_finite());
    }

    #[test]
    fn edge_on_maps_sky_axes() {
        let frame = ObserverFrame::new(FRAC_PI_2, 0.0);
        // The sky X axis lies in the equatorial plane, Y along the rotation axis.
        let x = frame.to_envelope([1.0, 0.0, 0.0]);
        assert!((x - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
        let y = frame.to_envelope([0.0, 1.0, 0.0]);
        assert!((y - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-12);
        let z = frame.to_envelope([0.0, 0.0, 1.0]);
        assert!((z - frame.line_of_sight()).norm() < 1e-12);
        assert!((envelope_from_observer(FRAC_PI_2, 0.0, [0.0, 0.0, 1.0]) - z).norm() < 1e-15);
    }

    #[test]
    fn transform_preserves_length() {
        let frame = ObserverFrame::new(PI / 3.0, 0.4);
        let v = frame.to_envelope([0.3, -1.2, 2.0]);
        assert!((v.norm() - (0.09f64 + 1.44 + 4.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn edge_on_kepler_major_axis_is_full_rotation() {
        let frame = ObserverFrame::new(FRAC_PI_2, 0.0);
        let los = frame.line_of_sight();
        for &x in &[0.5, 2.0, -3.0] {
            let s = frame.to_spherical([x, 0.0, 0.0]);
            let v = line_of_sight_velocity(&los, &s, true);
            let expected = x.signum() / x.abs().sqrt();
            assert!((v - expected).abs() < 1e-12, "x={x} v={v}");
        }
    }

    #[test]
    fn face_on_rotation_is_invisible() {
        let frame = ObserverFrame::new(0.0, 0.0);
        let los = frame.line_of_sight();
        let s = frame.to_spherical([1.0, 0.5, 0.0]);
        assert!(line_of_sight_velocity(&los, &s, true).abs() < 1e-12);
    }
}
