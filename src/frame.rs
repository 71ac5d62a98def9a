//! Cubic frames: ZYZ rotations, band-4 spherical-harmonic coefficients, and
//! the conversions between them.
//!
//! A frame `R = Rz(c) Ry(b) Rz(a)` stands for the cubic-symmetric function
//! `f_R(p) = Σ_j (r_j · p)⁴` on the unit sphere. Its band-4 projection is the
//! 9-vector SH representation, scaled so the identity frame has unit norm.
//! Coefficients are ordered `m = -4 ..= 4`.

use nalgebra::{Matrix3, SMatrix, Vector3};
use std::f64::consts::PI;
use std::sync::OnceLock;

pub type Sh = [f64; 9];
pub type WignerMatrix = SMatrix<f64, 9, 9>;

// ─────────────────────────────────────────────────────────────
//  ZYZ rotations
// ─────────────────────────────────────────────────────────────

pub fn rz(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0)
}

pub fn ry(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c)
}

fn drz(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(-s, -c, 0.0, c, -s, 0.0, 0.0, 0.0, 0.0)
}

fn dry(t: f64) -> Matrix3<f64> {
    let (s, c) = t.sin_cos();
    Matrix3::new(-s, 0.0, c, 0.0, 0.0, 0.0, -c, 0.0, -s)
}

/// `Rz(c) Ry(b) Rz(a)` for `abc = [a, b, c]`.
pub fn zyz_to_matrix(abc: &[f64]) -> Matrix3<f64> {
    rz(abc[2]) * ry(abc[1]) * rz(abc[0])
}

/// Partial derivatives of [`zyz_to_matrix`] with respect to `a`, `b`, `c`.
pub fn zyz_jacobian(abc: &[f64]) -> [Matrix3<f64>; 3] {
    let (a, b, c) = (abc[0], abc[1], abc[2]);
    [
        rz(c) * ry(b) * drz(a),
        rz(c) * dry(b) * rz(a),
        drz(c) * ry(b) * rz(a),
    ]
}

/// Convert per-element ZYZ angles (3 each) to column-major matrices (9 each).
pub fn zyz_to_matrices(abc: &[f64]) -> Vec<f64> {
    abc.chunks_exact(3)
        .flat_map(|e| zyz_to_matrix(e).as_slice().to_vec())
        .collect()
}

/// `3 - Σ_ij (RaᵀRb)_ij⁴`: zero iff the two frames agree up to the cube's
/// symmetry group.
pub fn cubic_misfit(ra: &Matrix3<f64>, rb: &Matrix3<f64>) -> f64 {
    let m = ra.transpose() * rb;
    3.0 - m.iter().map(|v| v.powi(4)).sum::<f64>()
}

/// A rotation whose third column is `n`.
pub fn normal_frame(n: &Vector3<f64>) -> Matrix3<f64> {
    let n = n.normalize();
    let helper = if n.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let t = helper.cross(&n).normalize();
    let b = n.cross(&t);
    Matrix3::from_columns(&[t, b, n])
}

/// Nearest orthogonal matrix `U Vᵀ` from the SVD `F = U Σ Vᵀ`.
pub fn orthogonalize(f: &Matrix3<f64>) -> Matrix3<f64> {
    let svd = f.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => u * v_t,
        _ => *f,
    }
}

/// Apply [`orthogonalize`] to every column-major 3×3 block of `mats`.
pub fn orthogonalize_frames(mats: &mut [f64]) {
    for block in mats.chunks_exact_mut(9) {
        let q = orthogonalize(&Matrix3::from_column_slice(block));
        block.copy_from_slice(q.as_slice());
    }
}

// ─────────────────────────────────────────────────────────────
//  Band-4 real spherical harmonics
// ─────────────────────────────────────────────────────────────

/// Orthonormal real SH of degree 4 at a unit vector.
pub fn band4(p: &Vector3<f64>) -> Sh {
    let (x, y, z) = (p.x, p.y, p.z);
    let (x2, y2, z2) = (x * x, y * y, z * z);
    [
        0.75 * (35.0 / PI).sqrt() * x * y * (x2 - y2),
        0.75 * (35.0 / (2.0 * PI)).sqrt() * (3.0 * x2 - y2) * y * z,
        0.75 * (5.0 / PI).sqrt() * x * y * (7.0 * z2 - 1.0),
        0.75 * (5.0 / (2.0 * PI)).sqrt() * y * z * (7.0 * z2 - 3.0),
        3.0 / 16.0 * (1.0 / PI).sqrt() * (35.0 * z2 * z2 - 30.0 * z2 + 3.0),
        0.75 * (5.0 / (2.0 * PI)).sqrt() * x * z * (7.0 * z2 - 3.0),
        3.0 / 8.0 * (5.0 / PI).sqrt() * (x2 - y2) * (7.0 * z2 - 1.0),
        0.75 * (35.0 / (2.0 * PI)).sqrt() * (x2 - 3.0 * y2) * x * z,
        3.0 / 16.0 * (35.0 / PI).sqrt() * (x2 * (x2 - 3.0 * y2) - y2 * (3.0 * x2 - y2)),
    ]
}

const GAUSS_NODES: [(f64, f64); 5] = [
    (0.0, 0.568_888_888_888_888_9),
    (-0.538_469_310_105_683_1, 0.478_628_670_499_366_5),
    (0.538_469_310_105_683_1, 0.478_628_670_499_366_5),
    (-0.906_179_845_938_664_0, 0.236_926_885_056_189_1),
    (0.906_179_845_938_664_0, 0.236_926_885_056_189_1),
];
const AZIMUTH_SAMPLES: usize = 10;

/// Product Gauss rule on the sphere, exact for polynomials up to degree 9.
/// Band-4 projections of quartics are therefore exact.
struct ShQuadrature {
    points: Vec<Vector3<f64>>,
    /// `w_q * Y_m(p_q)`
    weighted: Vec<Sh>,
    /// Multiplier that gives the identity frame unit norm.
    scale: f64,
    canonical: Sh,
}

impl ShQuadrature {
    fn build() -> Self {
        let mut points = Vec::with_capacity(GAUSS_NODES.len() * AZIMUTH_SAMPLES);
        let mut weighted = Vec::with_capacity(points.capacity());
        for &(z, w) in &GAUSS_NODES {
            let s = (1.0 - z * z).sqrt();
            for k in 0..AZIMUTH_SAMPLES {
                let phi = 2.0 * PI * (k as f64 + 0.5) / AZIMUTH_SAMPLES as f64;
                let p = Vector3::new(s * phi.cos(), s * phi.sin(), z);
                let wq = w * 2.0 * PI / AZIMUTH_SAMPLES as f64;
                weighted.push(band4(&p).map(|y| wq * y));
                points.push(p);
            }
        }
        let mut q = Self {
            points,
            weighted,
            scale: 1.0,
            canonical: [0.0; 9],
        };
        let raw = q.project(|p| cubic_poly(&Matrix3::identity(), p));
        let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
        q.scale = 1.0 / norm;
        q.canonical = raw.map(|v| v * q.scale);
        q
    }

    fn project(&self, f: impl Fn(&Vector3<f64>) -> f64) -> Sh {
        let mut out = [0.0; 9];
        for (p, wy) in self.points.iter().zip(&self.weighted) {
            let fp = f(p);
            for m in 0..9 {
                out[m] += wy[m] * fp;
            }
        }
        out
    }
}

fn quadrature() -> &'static ShQuadrature {
    static QUADRATURE: OnceLock<ShQuadrature> = OnceLock::new();
    QUADRATURE.get_or_init(ShQuadrature::build)
}

fn cubic_poly(r: &Matrix3<f64>, p: &Vector3<f64>) -> f64 {
    r.column_iter().map(|c| c.dot(p).powi(4)).sum()
}

/// SH coefficients of the identity frame: `[0, 0, 0, 0, √(7/12), 0, 0, 0, √(5/12)]`.
pub fn canonical_sh() -> Sh {
    quadrature().canonical
}

/// Unit-norm SH coefficients of the frame `r`.
pub fn sh_of_frame(r: &Matrix3<f64>) -> Sh {
    let q = quadrature();
    q.project(|p| cubic_poly(r, p)).map(|v| v * q.scale)
}

/// SH coefficients of a ZYZ frame and their derivatives: `jac[k][m]` is
/// `d sh_m / d abc_k`.
pub fn sh_of_zyz_with_jacobian(abc: &[f64]) -> (Sh, [Sh; 3]) {
    let q = quadrature();
    let r = zyz_to_matrix(abc);
    let dr = zyz_jacobian(abc);
    let mut sh = [0.0; 9];
    let mut jac = [[0.0; 9]; 3];
    for (p, wy) in q.points.iter().zip(&q.weighted) {
        let mut f = 0.0;
        let mut df = [0.0; 3];
        for j in 0..3 {
            let v = r.column(j).dot(p);
            f += v.powi(4);
            for k in 0..3 {
                df[k] += 4.0 * v.powi(3) * dr[k].column(j).dot(p);
            }
        }
        for m in 0..9 {
            sh[m] += wy[m] * f;
            for k in 0..3 {
                jac[k][m] += wy[m] * df[k];
            }
        }
    }
    (
        sh.map(|v| v * q.scale),
        jac.map(|row| row.map(|v| v * q.scale)),
    )
}

/// Band-4 rotation matrix: `sh_of_frame(r * s) = wigner(r) * sh_of_frame(s)`.
pub fn wigner(r: &Matrix3<f64>) -> WignerMatrix {
    let q = quadrature();
    let rt = r.transpose();
    let mut d = WignerMatrix::zeros();
    for (p, wy) in q.points.iter().zip(&q.weighted) {
        let yr = band4(&(rt * p));
        for i in 0..9 {
            for j in 0..9 {
                d[(i, j)] += wy[i] * yr[j];
            }
        }
    }
    d
}

// ─────────────────────────────────────────────────────────────
//  SH → ZYZ
// ─────────────────────────────────────────────────────────────

fn misfit(abc: &[f64; 3], target: &Sh) -> f64 {
    let r = zyz_to_matrix(abc);
    sh_of_frame(&r)
        .iter()
        .zip(target)
        .map(|(s, t)| (s - t).powi(2))
        .sum()
}

/// Closest ZYZ frame to a (not necessarily normalized) SH vector.
///
/// Coarse search over a grid of rotations, then Levenberg-Marquardt on
/// `|sh(abc) - ŝ|²` for at most `max_iters` steps. A zero vector maps to the
/// identity.
pub fn sh_to_zyz(sh: &[f64], max_iters: usize) -> [f64; 3] {
    let norm = sh.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return [0.0; 3];
    }
    let mut target = [0.0; 9];
    for (t, s) in target.iter_mut().zip(sh) {
        *t = s / norm;
    }

    let mut abc = [0.0; 3];
    let mut cost = misfit(&abc, &target);
    for ia in 0..4 {
        for ib in 0..5 {
            for ic in 0..8 {
                let trial = [
                    ia as f64 * PI / 8.0,
                    ib as f64 * PI / 8.0,
                    ic as f64 * PI / 4.0,
                ];
                let c = misfit(&trial, &target);
                if c < cost {
                    cost = c;
                    abc = trial;
                }
            }
        }
    }

    let mut lambda = 1e-3;
    for _ in 0..max_iters {
        if cost < 1e-28 {
            break;
        }
        let (s, jac) = sh_of_zyz_with_jacobian(&abc);
        let r: Vec<f64> = s.iter().zip(&target).map(|(s, t)| s - t).collect();
        let jtj = Matrix3::from_fn(|p, q| (0..9).map(|m| jac[p][m] * jac[q][m]).sum::<f64>());
        let jtr = Vector3::from_fn(|p, _| (0..9).map(|m| jac[p][m] * r[m]).sum::<f64>());
        if jtr.norm() < 1e-15 {
            break;
        }
        let damped = jtj + Matrix3::from_diagonal(&jtj.diagonal().map(|d| lambda * d.max(1e-12)));
        let Some(step) = damped.cholesky().map(|c| c.solve(&(-jtr))) else {
            lambda *= 10.0;
            continue;
        };
        let trial = [abc[0] + step.x, abc[1] + step.y, abc[2] + step.z];
        let c = misfit(&trial, &target);
        if c < cost {
            abc = trial;
            cost = c;
            lambda = (lambda * 0.3).max(1e-12);
            if step.norm() < 1e-12 {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
        }
    }
    abc
}
