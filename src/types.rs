use serde::Deserialize;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Construction-time invariant violations (`NullInput`,
/// `DimensionMismatch`) are raised before anything is evaluated.
/// Linear and nonlinear stage failures are terminal for that stage; nothing
/// in the crate retries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A composite was built from an empty collection, or from one whose
    /// entries are all `None`.
    #[error("composite has no terms")]
    NullInput,

    /// A term disagrees with the first non-null term about `Nx`.
    #[error("term {index} expects {found} variables, composite has {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    /// A term does not provide the requested derivative.
    #[error("{term} does not support {operation}")]
    Unsupported {
        term: &'static str,
        operation: &'static str,
    },

    /// Factorization failure reported by `sprs` / `sprs-ldl`.
    #[error("linear algebra error: {0}")]
    Linalg(#[from] sprs::errors::LinalgError),

    /// The Cholesky backend met a non-positive pivot.
    #[error("matrix is not positive definite: pivot {pivot} is {value:e}")]
    NotPositiveDefinite { pivot: usize, value: f64 },

    /// Iterative solve did not reach its tolerance.
    #[error("linear solve failed: {0}")]
    LinearSolve(String),

    /// Argmin solver returned an error.
    #[error("solver error: {0}")]
    Solver(String),

    #[error("missing required option `{0}`")]
    MissingOption(String),

    #[error("invalid option `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },

    /// Shape mismatch in input data.
    #[error("shape error: {0}")]
    Shape(String),

    /// A driver step ran before the step it depends on.
    #[error("{0} has not been set up")]
    NotReady(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<argmin::core::Error> for Error {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ─────────────────────────────────────────────────────────────
//  Sparse coordinate entry
// ─────────────────────────────────────────────────────────────

/// One `(row, col, value)` entry of a Hessian or Jacobian.
///
/// Lists of triplets may repeat a coordinate; assembly sums duplicates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }
}

// ─────────────────────────────────────────────────────────────
//  Nonlinear solver options / outcome
// ─────────────────────────────────────────────────────────────

/// L-BFGS settings.
///
/// `epsf` bounds the gradient norm, `epsx` the change in cost between
/// iterations (disabled when zero), `maxits` the iteration count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbfgsOptions {
    pub epsf: f64,
    pub epsx: f64,
    pub maxits: usize,
    /// Number of correction pairs kept.
    pub memory: usize,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            epsf: 1e-8,
            epsx: 0.0,
            maxits: 1000,
            memory: 10,
        }
    }
}

/// Equality-constrained settings for the augmented Lagrangian outer loop.
///
/// Deserializes from a plain JSON object; absent fields keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AugmentedLagrangianOptions {
    pub mu_init: f64,
    pub mu_factor: f64,
    pub mu_max: f64,
    pub max_outer_iters: usize,
    /// Stop once `max |c_k|` drops below this.
    pub constraint_tol: f64,
}

impl Default for AugmentedLagrangianOptions {
    fn default() -> Self {
        Self {
            mu_init: 10.0,
            mu_factor: 10.0,
            mu_max: 1e8,
            max_outer_iters: 10,
            constraint_tol: 1e-6,
        }
    }
}

/// Lifecycle of one L-BFGS run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerStatus {
    Initialized,
    Iterating,
    Converged,
    /// Terminal, but the caller should read it as "did not converge".
    MaxIterationsReached,
    Failed,
}

impl OptimizerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::MaxIterationsReached | Self::Failed
        )
    }
}

/// What a finished nonlinear stage reports back to its driver.
#[derive(Debug, Clone)]
pub struct OptimizationReport {
    pub status: OptimizerStatus,
    pub iterations: usize,
    /// Unique points at which the objective was evaluated.
    pub evaluations: usize,
    pub value: f64,
    pub gradient_norm: f64,
    /// Objective value at every unique evaluation, in order.
    pub loss_trace: Vec<f64>,
    /// Largest `|c_k|` at the solution; zero for unconstrained runs.
    pub constraint_max_violation: f64,
}

impl OptimizationReport {
    pub fn converged(&self) -> bool {
        self.status == OptimizerStatus::Converged
    }
}
