//! Capability traits for energies and constraints, and their composites.
//!
//! A driver owns its terms in an arena (`Vec<Option<T>>`); composites only
//! borrow that arena, so they are valid for as long as the driver keeps the
//! terms alive. `None` entries are skipped.

use crate::assembly;
use crate::types::{Error, Result, Triplet};

// ─────────────────────────────────────────────────────────────
//  Capability traits
// ─────────────────────────────────────────────────────────────

/// A scalar objective over a fixed-size variable vector.
///
/// `gra` and `hes` are additive: they add into caller-owned output, which the
/// caller must clear before composing independently.
pub trait Functional: Send + Sync {
    /// Name used in diagnostics and `Unsupported` errors.
    fn name(&self) -> &'static str;

    fn nx(&self) -> usize;

    fn val(&self, x: &[f64]) -> f64;

    fn gra(&self, x: &[f64], g: &mut [f64]);

    fn hes(&self, _x: &[f64], _hes: &mut Vec<Triplet>) -> Result<()> {
        Err(Error::Unsupported {
            term: self.name(),
            operation: "hessian",
        })
    }
}

/// A block of `nf` constraint rows over `nx` variables.
pub trait Constraint: Send + Sync {
    fn name(&self) -> &'static str;

    fn nx(&self) -> usize;

    fn nf(&self) -> usize;

    /// Writes the `nf` constraint values into `c`.
    fn val(&self, x: &[f64], c: &mut [f64]);

    /// Adds Jacobian entries, shifting every row by `row_offset`.
    fn jac(&self, x: &[f64], row_offset: usize, jac: &mut Vec<Triplet>);

    /// Adds the Hessian of row `k` into `hes[k]`.
    fn hes(&self, _x: &[f64], _hes: &mut [Vec<Triplet>]) -> Result<()> {
        Err(Error::Unsupported {
            term: self.name(),
            operation: "constraint hessian",
        })
    }
}

/// Shared `Nx` of the non-null entries, or the construction error.
fn common_nx<T>(terms: &[Option<T>], nx: impl Fn(&T) -> usize) -> Result<usize> {
    let mut expected = None;
    for (index, term) in terms.iter().enumerate() {
        let Some(term) = term else { continue };
        let found = nx(term);
        match expected {
            None => expected = Some(found),
            Some(expected) if expected != found => {
                return Err(Error::DimensionMismatch {
                    index,
                    expected,
                    found,
                });
            }
            Some(_) => {}
        }
    }
    expected.ok_or(Error::NullInput)
}

// ─────────────────────────────────────────────────────────────
//  Composite energy
// ─────────────────────────────────────────────────────────────

/// Sum of terms sharing one variable space.
#[derive(Debug)]
pub struct CompositeEnergy<'a, F> {
    terms: &'a [Option<F>],
    nx: usize,
}

impl<'a, F: Functional> CompositeEnergy<'a, F> {
    pub fn new(terms: &'a [Option<F>]) -> Result<Self> {
        let nx = common_nx(terms, |t| t.nx())?;
        Ok(Self { terms, nx })
    }

    /// Non-null terms, in arena order.
    pub fn terms(&self) -> impl Iterator<Item = &'a F> + '_ {
        self.terms.iter().flatten()
    }

    /// Per-term values at `x`, in arena order.
    pub fn values(&self, x: &[f64]) -> Vec<(&'static str, f64)> {
        self.terms().map(|t| (t.name(), t.val(x))).collect()
    }
}

impl<F: Functional> Functional for CompositeEnergy<'_, F> {
    fn name(&self) -> &'static str {
        "composite energy"
    }

    fn nx(&self) -> usize {
        self.nx
    }

    fn val(&self, x: &[f64]) -> f64 {
        self.terms().map(|t| t.val(x)).sum()
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        for term in self.terms() {
            term.gra(x, g);
        }
    }

    fn hes(&self, x: &[f64], hes: &mut Vec<Triplet>) -> Result<()> {
        for term in self.terms() {
            term.hes(x, hes)?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Composite constraint
// ─────────────────────────────────────────────────────────────

/// Row-stacked constraint blocks.
///
/// Block `i` occupies rows `offsets()[i] .. offsets()[i] + nf_i`, assigned in
/// insertion order when the composite is built.
#[derive(Debug)]
pub struct CompositeConstraint<'a, C> {
    terms: &'a [Option<C>],
    offsets: Vec<usize>,
    nx: usize,
    nf: usize,
}

impl<'a, C: Constraint> CompositeConstraint<'a, C> {
    pub fn new(terms: &'a [Option<C>]) -> Result<Self> {
        let nx = common_nx(terms, |t| t.nx())?;
        let mut offsets = Vec::new();
        let mut nf = 0;
        for term in terms.iter().flatten() {
            offsets.push(nf);
            nf += term.nf();
        }
        Ok(Self {
            terms,
            offsets,
            nx,
            nf,
        })
    }

    /// Row offset of each non-null block.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    fn blocks(&self) -> impl Iterator<Item = (usize, &'a C)> + '_ {
        self.offsets.iter().copied().zip(self.terms.iter().flatten())
    }
}

impl<C: Constraint> Constraint for CompositeConstraint<'_, C> {
    fn name(&self) -> &'static str {
        "composite constraint"
    }

    fn nx(&self) -> usize {
        self.nx
    }

    fn nf(&self) -> usize {
        self.nf
    }

    fn val(&self, x: &[f64], c: &mut [f64]) {
        for (off, term) in self.blocks() {
            term.val(x, &mut c[off..off + term.nf()]);
        }
    }

    fn jac(&self, x: &[f64], row_offset: usize, jac: &mut Vec<Triplet>) {
        for (off, term) in self.blocks() {
            term.jac(x, row_offset + off, jac);
        }
    }

    fn hes(&self, x: &[f64], hes: &mut [Vec<Triplet>]) -> Result<()> {
        for (off, term) in self.blocks() {
            term.hes(x, &mut hes[off..off + term.nf()])?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Augmented Lagrangian objective
// ─────────────────────────────────────────────────────────────

/// `E(x) + Σ_k λ_k c_k(x) + (μ/2) c_k(x)²` for equality constraints.
///
/// First-order only; the outer multiplier loop lives in
/// [`crate::optimizer::Lbfgs::minimize_constrained`].
pub struct AugmentedLagrangian<'a, E, C> {
    energy: &'a E,
    constraint: &'a C,
    pub lambdas: Vec<f64>,
    pub mu: f64,
}

impl<'a, E: Functional, C: Constraint> AugmentedLagrangian<'a, E, C> {
    pub fn new(energy: &'a E, constraint: &'a C, mu: f64) -> Result<Self> {
        if energy.nx() != constraint.nx() {
            return Err(Error::DimensionMismatch {
                index: 1,
                expected: energy.nx(),
                found: constraint.nx(),
            });
        }
        Ok(Self {
            energy,
            constraint,
            lambdas: vec![0.0; constraint.nf()],
            mu,
        })
    }

    pub fn constraint_values(&self, x: &[f64]) -> Vec<f64> {
        let mut c = vec![0.0; self.constraint.nf()];
        self.constraint.val(x, &mut c);
        c
    }

    /// `λ_k ← λ_k + μ c_k`.
    pub fn update_multipliers(&mut self, c: &[f64]) {
        for (lambda, &ck) in self.lambdas.iter_mut().zip(c) {
            *lambda += self.mu * ck;
        }
    }
}

impl<E: Functional, C: Constraint> Functional for AugmentedLagrangian<'_, E, C> {
    fn name(&self) -> &'static str {
        "augmented lagrangian"
    }

    fn nx(&self) -> usize {
        self.energy.nx()
    }

    fn val(&self, x: &[f64]) -> f64 {
        let c = self.constraint_values(x);
        let penalty: f64 = c
            .iter()
            .zip(&self.lambdas)
            .map(|(&ck, &lk)| lk * ck + 0.5 * self.mu * ck * ck)
            .sum();
        self.energy.val(x) + penalty
    }

    fn gra(&self, x: &[f64], g: &mut [f64]) {
        self.energy.gra(x, g);
        let c = self.constraint_values(x);
        let weights: Vec<f64> = c
            .iter()
            .zip(&self.lambdas)
            .map(|(&ck, &lk)| lk + self.mu * ck)
            .collect();
        let mut jac = Vec::new();
        self.constraint.jac(x, 0, &mut jac);
        assembly::add_transpose_product(&jac, &weights, g);
    }
}
