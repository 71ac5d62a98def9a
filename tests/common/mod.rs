//! Shared fixtures: small conforming meshes, configs and the
//! central-difference gradient harness.

#![allow(dead_code)]

use fieldopt::config::Config;
use fieldopt::mesh::{TetMesh, TriMesh};
use fieldopt::types::Triplet;
use fieldopt::Functional;
use ndarray::Array2;

// ─────────────────────────────────────────────────────────────
//  Meshes
// ─────────────────────────────────────────────────────────────

/// Kuhn split of the unit cube: six tets around the 0→7 diagonal, corner
/// `c` at `(c & 1, (c >> 1) & 1, (c >> 2) & 1)`.
pub const KUHN_TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

/// `k × k × k` grid of unit cubes, each Kuhn-split, spanning `[0, k]³`.
pub fn cube_grid(k: usize) -> TetMesh {
    let side = k + 1;
    let index = |i: usize, j: usize, l: usize| i + side * (j + side * l);
    let mut nodes = Vec::with_capacity(3 * side * side * side);
    for l in 0..side {
        for j in 0..side {
            for i in 0..side {
                nodes.extend([i as f64, j as f64, l as f64]);
            }
        }
    }
    let mut tets = Vec::with_capacity(6 * k * k * k);
    for l in 0..k {
        for j in 0..k {
            for i in 0..k {
                let corner = |c: usize| index(i + (c & 1), j + ((c >> 1) & 1), l + ((c >> 2) & 1));
                for tet in KUHN_TETS {
                    tets.push(tet.map(corner));
                }
            }
        }
    }
    let nodes = Array2::from_shape_vec((side * side * side, 3), nodes).unwrap();
    TetMesh::new(tets, nodes).unwrap()
}

pub fn kuhn_cube() -> TetMesh {
    cube_grid(1)
}

/// Apply a linear map to every node.
pub fn transformed(mesh: &TetMesh, m: &nalgebra::Matrix3<f64>) -> TetMesh {
    let mut out = mesh.clone();
    for i in 0..mesh.num_nodes() {
        let p = m * mesh.node(i);
        for c in 0..3 {
            out.nodes[[i, c]] = p[c];
        }
    }
    out
}

/// Flat `n × n` vertex grid in the xy plane with unit spacing, two right
/// triangles per cell. Vertex `(i, j)` is `i + n j`.
pub fn planar_grid(n: usize) -> TriMesh {
    let mut nodes = Vec::with_capacity(3 * n * n);
    for j in 0..n {
        for i in 0..n {
            nodes.extend([i as f64, j as f64, 0.0]);
        }
    }
    let mut tris = Vec::with_capacity(2 * (n - 1) * (n - 1));
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let v = i + n * j;
            tris.push([v, v + 1, v + n + 1]);
            tris.push([v, v + n + 1, v + n]);
        }
    }
    let nodes = Array2::from_shape_vec((n * n, 3), nodes).unwrap();
    TriMesh::new(tris, nodes).unwrap()
}

// ─────────────────────────────────────────────────────────────
//  Inputs
// ─────────────────────────────────────────────────────────────

/// Deterministic values in `[-1, 1)` (64-bit LCG).
pub fn pseudo_random(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
        })
        .collect()
}

/// Options every driver needs, with small iteration budgets.
pub fn base_config() -> serde_json::Value {
    serde_json::json!({
        "weight": {
            "smooth": { "value": 1.0 },
            "align": { "value": 1.0 },
            "boundary": { "value": 1.0 },
            "orth": { "value": 1.0 },
            "distortion": { "value": 1.0 },
        },
        "abs_eps": { "value": 1e-3 },
        "lbfgs": {
            "epsf": { "value": 1e-8 },
            "maxits": { "value": 200 },
        },
        "lins": { "type": { "value": "cholesky" } },
    })
}

pub fn config() -> Config {
    Config::from_value(base_config())
}

// ─────────────────────────────────────────────────────────────
//  Finite differences
// ─────────────────────────────────────────────────────────────

/// Central-difference check of `energy.gra` at `x`; prints a per-component
/// table before asserting.
pub fn fd_gradient_check<F: Functional>(energy: &F, x: &[f64], h: f64, tol_abs: f64, tol_rel: f64) {
    let n = x.len();
    let mut analytic = vec![0.0; n];
    energy.gra(x, &mut analytic);

    let mut fd = vec![0.0; n];
    let mut xp = x.to_vec();
    for i in 0..n {
        xp[i] = x[i] + h;
        let f_plus = energy.val(&xp);
        xp[i] = x[i] - h;
        let f_minus = energy.val(&xp);
        xp[i] = x[i];
        fd[i] = (f_plus - f_minus) / (2.0 * h);
    }

    let errors: Vec<(f64, f64)> = analytic
        .iter()
        .zip(&fd)
        .map(|(a, f)| {
            let abs_err = (a - f).abs();
            (abs_err, abs_err / a.abs().max(f.abs()).max(1e-14))
        })
        .collect();
    let (worst, max_abs) = errors
        .iter()
        .enumerate()
        .fold((0, 0.0_f64), |(wi, wa), (i, &(a, _))| if a > wa { (i, a) } else { (wi, wa) });
    let max_rel = errors.iter().fold(0.0_f64, |m, &(_, r)| m.max(r));

    eprintln!("──────────────────────────────────────────────");
    eprintln!("FD gradient check: {}  (h = {h:.1e}, n = {n})", energy.name());
    eprintln!("  max |g_a - g_fd|  = {max_abs:.3e}  at component {worst}");
    eprintln!("  max relative err  = {max_rel:.3e}");
    for (i, &(abs_err, rel_err)) in errors.iter().enumerate() {
        if abs_err > tol_abs && rel_err > tol_rel {
            eprintln!(
                "  x[{i:>3}]  analytic={:+12.6e}  fd={:+12.6e}  abs={abs_err:.2e}  rel={rel_err:.2e} <<<",
                analytic[i], fd[i],
            );
        }
    }
    eprintln!("──────────────────────────────────────────────");

    for (i, &(abs_err, rel_err)) in errors.iter().enumerate() {
        assert!(
            abs_err < tol_abs || rel_err < tol_rel,
            "{}: component {i}: analytic={:.8e}, fd={:.8e}, abs_err={abs_err:.3e}, rel_err={rel_err:.3e}",
            energy.name(),
            analytic[i],
            fd[i],
        );
    }
}

/// `H v` from assembled Hessian triplets.
pub fn hessian_times(triplets: &[Triplet], v: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; v.len()];
    for t in triplets {
        out[t.row] += t.value * v[t.col];
    }
    out
}

/// Central-difference check of `energy.hes` along direction `v`.
pub fn fd_hessian_check<F: Functional>(energy: &F, x: &[f64], v: &[f64], h: f64, tol: f64) {
    let mut triplets = Vec::new();
    energy.hes(x, &mut triplets).unwrap();
    let hv = hessian_times(&triplets, v);

    let shifted = |s: f64| {
        let xs: Vec<f64> = x.iter().zip(v).map(|(xi, vi)| xi + s * vi).collect();
        let mut g = vec![0.0; x.len()];
        energy.gra(&xs, &mut g);
        g
    };
    let (gp, gm) = (shifted(h), shifted(-h));
    for i in 0..x.len() {
        let fd = (gp[i] - gm[i]) / (2.0 * h);
        assert!(
            (hv[i] - fd).abs() < tol * (1.0 + fd.abs()),
            "{}: (Hv)[{i}] = {:.8e}, fd = {fd:.8e}",
            energy.name(),
            hv[i],
        );
    }
}
