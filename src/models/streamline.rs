//! Streamline parameter μ₀ of the rotating-infall (Ulrich) envelope.
//!
//! A parcel at dimensionless radius `r` (units of the centrifugal radius) and
//! polar cosine `μ` moves on the streamline that left the equator at infinity
//! with polar cosine `μ₀`, the largest real root of
//!
//! ```text
//! μ₀³ + (r - 1) μ₀ - μ r = 0      (equivalently μ₀³ + 3p μ₀ - 2q = 0)
//! p = (r - 1) / 3,  q = μ r / 2
//! ```
//!
//! A single closed form is ill-conditioned near `r = 1` and `μ = 0`, so the
//! root is evaluated by an explicit per-sample case split:
//!
//! - `AboveUnity` (`r >= 1`, `p >= 0`): one real root. The Cardano form
//!   `D^{1/6}[(1 + q/√D)^{1/3} - (1 - q/√D)^{1/3}]` with `D = q² + p³` is
//!   evaluated as `2q / (u² + p + (p/u)²)` with `u = (q + √D)^{1/3}`, the same
//!   root without the cancellation between the two cube roots.
//! - `BelowUnityRealRoots` (`r < 1`, `D' = q² - (-p)³ >= 0`):
//!   `(q + √D')^{1/3} + (q - √D')^{1/3}`, evaluated as `u - p/u`.
//! - `BelowUnityTrigonometric` (`r < 1`, `D' < 0`): three real roots, the
//!   largest is `2√(-p) cos(arccos(q (-p)^{-3/2}) / 3)`.

/// Which closed-form branch yields μ₀ for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamlineCase {
    AboveUnity,
    BelowUnityRealRoots,
    BelowUnityTrigonometric,
}

/// μ₀ for one sample, tagged with the branch that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamlineSolution {
    pub mu0: f64,
    pub case: StreamlineCase,
}

/// Cubic coefficients `(p, q)` for a sample.
pub fn coefficients(radius: f64, mu: f64) -> (f64, f64) {
    ((radius - 1.0) / 3.0, mu * radius / 2.0)
}

/// Pick the branch for `(radius, μ)`; `μ` is the clipped |cos θ|.
pub fn classify(radius: f64, mu: f64) -> StreamlineCase {
    if radius >= 1.0 {
        return StreamlineCase::AboveUnity;
    }
    let (p, q) = coefficients(radius, mu);
    let p_minus = (-p).max(0.0);
    if q * q - p_minus.powi(3) >= 0.0 {
        StreamlineCase::BelowUnityRealRoots
    } else {
        StreamlineCase::BelowUnityTrigonometric
    }
}

/// Solve for μ₀, choosing the branch automatically.
pub fn solve(radius: f64, mu: f64) -> StreamlineSolution {
    let case = classify(radius, mu);
    StreamlineSolution {
        mu0: solve_case(case, radius, mu),
        case,
    }
}

/// Evaluate one branch regardless of whether it applies to `(radius, μ)`.
///
/// Branches outside their domain may return NaN.
pub fn solve_case(case: StreamlineCase, radius: f64, mu: f64) -> f64 {
    let (p, q) = coefficients(radius, mu);
    match case {
        StreamlineCase::AboveUnity => above_unity(p, q),
        StreamlineCase::BelowUnityRealRoots => below_unity_real(p, q),
        StreamlineCase::BelowUnityTrigonometric => below_unity_trig(p, q),
    }
}

/// Residual of the streamline cubic at `mu0`.
pub fn cubic_residual(radius: f64, mu: f64, mu0: f64) -> f64 {
    mu0.powi(3) + (radius - 1.0) * mu0 - mu * radius
}

fn above_unity(p: f64, q: f64) -> f64 {
    let d = q * q + p.powi(3);
    let u = (q + d.sqrt()).cbrt();
    let v = p / u;
    2.0 * q / (u * u + p + v * v)
}

fn below_unity_real(p: f64, q: f64) -> f64 {
    let p_minus = (-p).max(0.0);
    let d = q * q - p_minus.powi(3);
    let u = (q + d.sqrt()).cbrt();
    // (q - √D')^{1/3} = -p / u since the product of the two cube roots is -p.
    u - p / u
}

fn below_unity_trig(p: f64, q: f64) -> f64 {
    let p_minus = (-p).max(0.0);
    let arg = (q * p_minus.powf(-1.5)).clamp(-1.0, 1.0);
    2.0 * p_minus.sqrt() * (arg.acos() / 3.0).cos()
}
