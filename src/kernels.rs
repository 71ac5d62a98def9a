//! Per-element energy kernels: pure functions of local element data.
//!
//! Each loss has a matching `_grad`. Weights and stiffness are applied by
//! the caller in [`crate::terms`].

use nalgebra::{Matrix3, Vector3};

// ─────────────────────────────────────────────────────────────
//  Cubic frame smoothness
// ─────────────────────────────────────────────────────────────

/// `6 - 2 Σ_ij M_ij⁴` with `M = RaᵀRb`; zero iff the frames agree up to
/// cubic symmetry.
pub fn frame_smoothness_loss(ra: &Matrix3<f64>, rb: &Matrix3<f64>) -> f64 {
    let m = ra.transpose() * rb;
    6.0 - 2.0 * m.iter().map(|v| v.powi(4)).sum::<f64>()
}

/// Derivatives of [`frame_smoothness_loss`] with respect to `Ra` and `Rb`.
pub fn frame_smoothness_grad(ra: &Matrix3<f64>, rb: &Matrix3<f64>) -> (Matrix3<f64>, Matrix3<f64>) {
    let m = ra.transpose() * rb;
    let g = m.map(|v| -8.0 * v.powi(3));
    (rb * g.transpose(), ra * g)
}

// ─────────────────────────────────────────────────────────────
//  Frame-to-normal alignment
// ─────────────────────────────────────────────────────────────

/// `1 - Σ_j (r_j · n)⁴`; zero iff some frame axis is parallel to `n`.
pub fn frame_alignment_loss(r: &Matrix3<f64>, n: &Vector3<f64>) -> f64 {
    1.0 - r.column_iter().map(|c| c.dot(n).powi(4)).sum::<f64>()
}

pub fn frame_alignment_grad(r: &Matrix3<f64>, n: &Vector3<f64>) -> Matrix3<f64> {
    let v = r.transpose() * n;
    Matrix3::from_fn(|i, j| -4.0 * n[i] * v[j].powi(3))
}

/// Chain a matrix gradient `dE/dR` through the three ZYZ partials.
pub fn zyz_pullback(dr: &[Matrix3<f64>; 3], g: &Matrix3<f64>) -> [f64; 3] {
    dr.each_ref().map(|d| d.component_mul(g).sum())
}

// ─────────────────────────────────────────────────────────────
//  Smoothed L1
// ─────────────────────────────────────────────────────────────

#[inline]
pub fn smoothed_abs(d: f64, eps: f64) -> f64 {
    (d * d + eps).sqrt()
}

#[inline]
pub fn smoothed_abs_grad(d: f64, eps: f64) -> f64 {
    d / (d * d + eps).sqrt()
}

// ─────────────────────────────────────────────────────────────
//  Orthogonality
// ─────────────────────────────────────────────────────────────

/// `|FᵀF - I|²` (Frobenius).
pub fn orthogonality_loss(f: &Matrix3<f64>) -> f64 {
    (f.transpose() * f - Matrix3::identity()).norm_squared()
}

pub fn orthogonality_grad(f: &Matrix3<f64>) -> Matrix3<f64> {
    4.0 * f * (f.transpose() * f - Matrix3::identity())
}

// ─────────────────────────────────────────────────────────────
//  As-rigid-as-possible distortion
// ─────────────────────────────────────────────────────────────

/// Closest rotation to `f` (polar factor with reflections removed).
pub fn rotation_part(f: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = f.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Matrix3::identity();
    };
    if (u * v_t).determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        u.column_mut(weakest).neg_mut();
    }
    u * v_t
}

/// `|F - R(F)|²`.
pub fn arap_loss(f: &Matrix3<f64>) -> f64 {
    (f - rotation_part(f)).norm_squared()
}

pub fn arap_grad(f: &Matrix3<f64>) -> Matrix3<f64> {
    2.0 * (f - rotation_part(f))
}

// ─────────────────────────────────────────────────────────────
//  Triangle area vector
// ─────────────────────────────────────────────────────────────

/// `½ (xj - xi) × (xk - xi)`: normal scaled by area.
pub fn area_vector(xi: &Vector3<f64>, xj: &Vector3<f64>, xk: &Vector3<f64>) -> Vector3<f64> {
    0.5 * (xj - xi).cross(&(xk - xi))
}

/// Gradients of `s · area_vector(xi, xj, xk)` with respect to the three
/// corners.
pub fn area_vector_pullback(
    xi: &Vector3<f64>,
    xj: &Vector3<f64>,
    xk: &Vector3<f64>,
    s: &Vector3<f64>,
) -> [Vector3<f64>; 3] {
    let e1 = xj - xi;
    let e2 = xk - xi;
    let gj = 0.5 * e2.cross(s);
    let gk = 0.5 * s.cross(&e1);
    [-(gj + gk), gj, gk]
}
