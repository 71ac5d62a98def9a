//! Sparse symmetric solves for quadratic sub-problems.
//!
//! Three backends, chosen by the `lins.type.value` option:
//!
//! * `cholesky` (default): sparse LDLᵀ with RCM ordering, rejected unless
//!   every pivot of D is positive.
//! * `ldl`: same factorization with no sign check on D.
//! * `cg`: Jacobi-preconditioned conjugate gradient.
//!
//! A [`Factorization`] is built once and may serve several right-hand sides.

use crate::assembly::{self, dot, norm};
use crate::config::Config;
use crate::dof::DofMap;
use crate::functional::Functional;
use crate::types::{Error, Result, Triplet};
use sprs::{CsMat, FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};
use std::collections::BTreeSet;
use tracing::{debug, error};

// ─────────────────────────────────────────────────────────────
//  Backend selection
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LinearBackend {
    #[default]
    Cholesky,
    Ldl,
    ConjugateGradient { tolerance: f64, max_iterations: usize },
}

impl LinearBackend {
    pub fn cg() -> Self {
        Self::ConjugateGradient {
            tolerance: 1e-10,
            max_iterations: 10_000,
        }
    }

    /// Parse a backend name. Accepts the historical aliases `cholmod`,
    /// `llt` and `petsc`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cholesky" | "cholmod" | "llt" => Ok(Self::Cholesky),
            "ldl" => Ok(Self::Ldl),
            "cg" | "petsc" => Ok(Self::cg()),
            other => Err(Error::InvalidOption {
                key: "lins.type.value".into(),
                reason: format!("unknown linear solver `{other}`"),
            }),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let name: String = config.get_or("lins.type.value", "cholesky".to_string())?;
        let backend = Self::from_name(&name)?;
        match backend {
            Self::ConjugateGradient { .. } => Ok(Self::ConjugateGradient {
                tolerance: config.get_or("lins.tol.value", 1e-10)?,
                max_iterations: config.get_or("lins.maxits.value", 10_000)?,
            }),
            _ => Ok(backend),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Factorization
// ─────────────────────────────────────────────────────────────

/// A system matrix prepared for repeated solves.
pub enum Factorization {
    /// SPD path: RCM-ordered, D > 0 validated
    Cholesky(LdlNumeric<f64, usize>),
    /// Indefinite path: no sign constraint on D
    Ldl(LdlNumeric<f64, usize>),
    ConjugateGradient(JacobiCg),
}

impl std::fmt::Debug for Factorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cholesky(_) => write!(f, "Factorization::Cholesky(...)"),
            Self::Ldl(_) => write!(f, "Factorization::Ldl(...)"),
            Self::ConjugateGradient(cg) => {
                write!(f, "Factorization::ConjugateGradient(n = {})", cg.a.rows())
            }
        }
    }
}

impl Factorization {
    pub fn new(a: &CsMat<f64>, backend: LinearBackend) -> Result<Self> {
        if a.rows() != a.cols() {
            return Err(Error::Shape(format!(
                "system matrix is {}×{}",
                a.rows(),
                a.cols()
            )));
        }
        let a = a.to_csc();
        match backend {
            LinearBackend::Cholesky => {
                let ldl = factor_ldl(&a)?;
                if let Some((pivot, &value)) = ldl.d().iter().enumerate().find(|(_, &d)| d <= 0.0) {
                    return Err(Error::NotPositiveDefinite { pivot, value });
                }
                Ok(Self::Cholesky(ldl))
            }
            LinearBackend::Ldl => Ok(Self::Ldl(factor_ldl(&a)?)),
            LinearBackend::ConjugateGradient {
                tolerance,
                max_iterations,
            } => Ok(Self::ConjugateGradient(JacobiCg::new(a, tolerance, max_iterations)?)),
        }
    }

    /// Solve A x = rhs.
    pub fn solve(&self, rhs: &[f64]) -> Result<Vec<f64>> {
        let n = self.dim();
        if rhs.len() != n {
            return Err(Error::Shape(format!(
                "right-hand side has {} entries, system has {n}",
                rhs.len()
            )));
        }
        match self {
            Self::Cholesky(ldl) | Self::Ldl(ldl) => {
                let x = ldl.solve(rhs);
                if x.iter().all(|v| v.is_finite()) {
                    Ok(x)
                } else {
                    Err(Error::LinearSolve("factorized solve produced non-finite values".into()))
                }
            }
            Self::ConjugateGradient(cg) => cg.solve(rhs),
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            Self::Cholesky(ldl) | Self::Ldl(ldl) => ldl.d().len(),
            Self::ConjugateGradient(cg) => cg.a.rows(),
        }
    }
}

fn factor_ldl(a: &CsMat<f64>) -> Result<LdlNumeric<f64, usize>> {
    Ok(Ldl::new()
        .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
        .check_symmetry(SymmetryCheck::DontCheckSymmetry)
        .numeric(a.view())?)
}

/// One-shot `A x = rhs`.
pub fn solve(a: &CsMat<f64>, rhs: &[f64], backend: LinearBackend) -> Result<Vec<f64>> {
    Factorization::new(a, backend)?.solve(rhs)
}

// ─────────────────────────────────────────────────────────────
//  Jacobi-preconditioned conjugate gradient
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JacobiCg {
    a: CsMat<f64>,
    inv_diag: Vec<f64>,
    tolerance: f64,
    max_iterations: usize,
}

impl JacobiCg {
    fn new(a: CsMat<f64>, tolerance: f64, max_iterations: usize) -> Result<Self> {
        let mut diag = vec![0.0; a.rows()];
        for (&v, (r, c)) in a.iter() {
            if r == c {
                diag[r] += v;
            }
        }
        if let Some((pivot, &value)) = diag.iter().enumerate().find(|(_, &d)| d <= 0.0) {
            return Err(Error::NotPositiveDefinite { pivot, value });
        }
        Ok(Self {
            inv_diag: diag.iter().map(|d| 1.0 / d).collect(),
            a,
            tolerance,
            max_iterations,
        })
    }

    fn solve(&self, b: &[f64]) -> Result<Vec<f64>> {
        let n = b.len();
        let mut x = vec![0.0; n];
        let b_norm = norm(b);
        if b_norm == 0.0 {
            return Ok(x);
        }
        let mut r = b.to_vec();
        let mut z: Vec<f64> = r.iter().zip(&self.inv_diag).map(|(r, d)| r * d).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);

        for it in 0..self.max_iterations {
            let ap = assembly::mul_vec(&self.a, &p);
            let pap = dot(&p, &ap);
            if pap <= 0.0 {
                return Err(Error::NotPositiveDefinite { pivot: it, value: pap });
            }
            let alpha = rz / pap;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * ap[i];
            }
            let rel = norm(&r) / b_norm;
            if rel < self.tolerance {
                debug!(iterations = it + 1, residual = rel, "cg converged");
                return Ok(x);
            }
            for i in 0..n {
                z[i] = r[i] * self.inv_diag[i];
            }
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
        }
        Err(Error::LinearSolve(format!(
            "conjugate gradient did not reach {:e} in {} iterations",
            self.tolerance, self.max_iterations
        )))
    }
}

// ─────────────────────────────────────────────────────────────
//  Direct stage over a quadratic energy
// ─────────────────────────────────────────────────────────────

/// Reduced Hessian of `energy` at `x` over the variables not in `fixed`.
pub fn reduced_hessian<F: Functional>(energy: &F, x: &[f64], dofs: &DofMap) -> Result<CsMat<f64>> {
    let mut hes: Vec<Triplet> = Vec::new();
    energy.hes(x, &mut hes)?;
    let reduced = dofs.reduce_triplets(&hes);
    assembly::assemble(dofs.num_free(), dofs.num_free(), &reduced)
}

/// One Newton step of a quadratic energy with `fixed` variables pinned.
///
/// Solves `H dx = -g` on the free variables and applies `x += dx`; pinned
/// entries of `x` are left untouched. Exact for quadratics, so this is the
/// whole solve. Returns the energy after the step.
pub fn solve_quadratic_stage<F: Functional>(
    energy: &F,
    x: &mut [f64],
    fixed: &BTreeSet<usize>,
    backend: LinearBackend,
) -> Result<f64> {
    if x.len() != energy.nx() {
        return Err(Error::Shape(format!(
            "{} expects {} variables, got {}",
            energy.name(),
            energy.nx(),
            x.len()
        )));
    }
    let dofs = DofMap::new(x.len(), fixed)?;
    if dofs.num_free() == 0 {
        return Ok(energy.val(x));
    }
    let h = reduced_hessian(energy, x, &dofs)?;
    let factor = Factorization::new(&h, backend)?;
    newton_step(energy, x, &dofs, &factor)
}

/// Newton step reusing an existing factorization of the reduced Hessian.
pub fn newton_step<F: Functional>(
    energy: &F,
    x: &mut [f64],
    dofs: &DofMap,
    factor: &Factorization,
) -> Result<f64> {
    let mut g = vec![0.0; x.len()];
    energy.gra(x, &mut g);
    let rhs: Vec<f64> = dofs.reduce_vector(&g)?.iter().map(|v| -v).collect();
    let dx = factor.solve(&rhs).map_err(|e| {
        error!(energy = energy.name(), "linear stage failed: {e}");
        e
    })?;
    for (&gi, d) in dofs.free_indices().iter().zip(&dx) {
        x[gi] += d;
    }
    let value = energy.val(x);
    debug!(
        energy = energy.name(),
        free = dofs.num_free(),
        value,
        "linear stage solved"
    );
    Ok(value)
}
