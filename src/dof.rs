//! Elimination of pinned degrees of freedom.
//!
//! [`DofMap`] keeps a global → local index table (`None` for excluded
//! variables) and moves matrices and vectors between the full system and the
//! reduced one over the free variables only.

use crate::types::{Error, Result, Triplet};
use sprs::{CsMat, TriMat};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct DofMap {
    global_to_local: Vec<Option<usize>>,
    local_to_global: Vec<usize>,
}

impl DofMap {
    /// Map over `n` variables with `excluded` removed.
    pub fn new(n: usize, excluded: &BTreeSet<usize>) -> Result<Self> {
        if let Some(&bad) = excluded.range(n..).next() {
            return Err(Error::Shape(format!(
                "excluded index {bad} out of range for {n} variables"
            )));
        }
        let mut global_to_local = vec![None; n];
        let mut local_to_global = Vec::with_capacity(n - excluded.len());
        for (g, slot) in global_to_local.iter_mut().enumerate() {
            if !excluded.contains(&g) {
                *slot = Some(local_to_global.len());
                local_to_global.push(g);
            }
        }
        Ok(Self {
            global_to_local,
            local_to_global,
        })
    }

    pub fn num_total(&self) -> usize {
        self.global_to_local.len()
    }

    pub fn num_free(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn free_indices(&self) -> &[usize] {
        &self.local_to_global
    }

    pub fn local(&self, global: usize) -> Option<usize> {
        self.global_to_local.get(global).copied().flatten()
    }

    /// Drop the rows and columns of excluded variables.
    pub fn reduce_matrix(&self, a: &CsMat<f64>) -> Result<CsMat<f64>> {
        let n = self.num_total();
        if a.rows() != n || a.cols() != n {
            return Err(Error::Shape(format!(
                "matrix is {}×{}, dof map covers {n}",
                a.rows(),
                a.cols()
            )));
        }
        let m = self.num_free();
        let mut tri = TriMat::with_capacity((m, m), a.nnz());
        for (&v, (r, c)) in a.iter() {
            if let (Some(lr), Some(lc)) = (self.global_to_local[r], self.global_to_local[c]) {
                tri.add_triplet(lr, lc, v);
            }
        }
        Ok(tri.to_csc())
    }

    /// Triplet version of [`Self::reduce_matrix`].
    pub fn reduce_triplets(&self, triplets: &[Triplet]) -> Vec<Triplet> {
        triplets
            .iter()
            .filter_map(|t| {
                let r = self.local(t.row)?;
                let c = self.local(t.col)?;
                Some(Triplet::new(r, c, t.value))
            })
            .collect()
    }

    /// Keep only the entries of free variables.
    pub fn reduce_vector(&self, v: &[f64]) -> Result<Vec<f64>> {
        self.check_full(v.len())?;
        Ok(self.local_to_global.iter().map(|&g| v[g]).collect())
    }

    /// Write a reduced vector into the free positions of `full`.
    /// Excluded positions keep whatever value they had.
    pub fn scatter(&self, reduced: &[f64], full: &mut [f64]) -> Result<()> {
        self.check_full(full.len())?;
        self.check_reduced(reduced.len())?;
        for (&g, &v) in self.local_to_global.iter().zip(reduced) {
            full[g] = v;
        }
        Ok(())
    }

    /// Full-size vector with zeros at excluded positions.
    pub fn expand(&self, reduced: &[f64]) -> Result<Vec<f64>> {
        let mut full = vec![0.0; self.num_total()];
        self.scatter(reduced, &mut full)?;
        Ok(full)
    }

    fn check_full(&self, len: usize) -> Result<()> {
        if len != self.num_total() {
            return Err(Error::Shape(format!(
                "vector has {len} entries, expected {}",
                self.num_total()
            )));
        }
        Ok(())
    }

    fn check_reduced(&self, len: usize) -> Result<()> {
        if len != self.num_free() {
            return Err(Error::Shape(format!(
                "reduced vector has {len} entries, expected {}",
                self.num_free()
            )));
        }
        Ok(())
    }
}
