//! Triplet-to-CSC assembly and the small sparse kernels built on it.

use crate::types::{Error, Result, Triplet};
use sprs::{CsMat, TriMat};

/// Assemble an `n_rows × n_cols` CSC matrix, summing repeated coordinates.
pub fn assemble(n_rows: usize, n_cols: usize, triplets: &[Triplet]) -> Result<CsMat<f64>> {
    let mut tri = TriMat::with_capacity((n_rows, n_cols), triplets.len());
    for t in triplets {
        if t.row >= n_rows || t.col >= n_cols {
            return Err(Error::Shape(format!(
                "triplet ({}, {}) outside {n_rows}×{n_cols}",
                t.row, t.col
            )));
        }
        tri.add_triplet(t.row, t.col, t.value);
    }
    Ok(tri.to_csc())
}

/// Push `value` on the diagonal of the `n × n` block starting at
/// `(row, col)`.
pub fn add_diag_block(hes: &mut Vec<Triplet>, row: usize, col: usize, n: usize, value: f64) {
    hes.extend((0..n).map(|k| Triplet::new(row + k, col + k, value)));
}

/// Push a dense row-major `n × n` block starting at `(row, col)`.
pub fn add_dense_block(hes: &mut Vec<Triplet>, row: usize, col: usize, n: usize, block: &[f64]) {
    for i in 0..n {
        for j in 0..n {
            let v = block[i * n + j];
            if v != 0.0 {
                hes.push(Triplet::new(row + i, col + j, v));
            }
        }
    }
}

/// `y = A x`.
pub fn mul_vec(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; a.rows()];
    for (&v, (r, c)) in a.iter() {
        y[r] += v * x[c];
    }
    y
}

/// `out += Jᵀ w` for `J` given as triplets.
pub fn add_transpose_product(jac: &[Triplet], w: &[f64], out: &mut [f64]) {
    for t in jac {
        out[t.col] += t.value * w[t.row];
    }
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
