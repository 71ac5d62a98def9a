//! L-BFGS optimisation driver via the `argmin` crate.
//!
//! Wraps any [`Functional`] into argmin's `CostFunction` + `Gradient`
//! traits, then runs L-BFGS with More-Thuente line search.
//!
//! Uses `Vec<f64>` as the argmin parameter type to avoid ndarray version
//! conflicts between our ndarray 0.16 and argmin-math's bundled ndarray.

use crate::assembly::norm;
use crate::functional::{AugmentedLagrangian, CompositeEnergy, Constraint, Functional};
use crate::types::{
    AugmentedLagrangianOptions, Error, LbfgsOptions, OptimizationReport, OptimizerStatus, Result,
};
use crate::config::Config;
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use std::cell::{Cell, RefCell};
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────
//  Monitor
// ─────────────────────────────────────────────────────────────

/// Read-only progress hook, called with `(evaluation count, x)` every
/// `every` unique evaluations.
pub struct Monitor<'m> {
    every: usize,
    hook: Box<dyn FnMut(usize, &[f64]) + 'm>,
}

impl<'m> Monitor<'m> {
    pub fn new(every: usize, hook: impl FnMut(usize, &[f64]) + 'm) -> Self {
        Self {
            every: every.max(1),
            hook: Box::new(hook),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  argmin problem wrapper
// ─────────────────────────────────────────────────────────────

/// Adapts a [`Functional`] for argmin.
///
/// **Evaluation cache**: argmin calls `cost(x)` and `gradient(x)` separately
/// at the same point each iteration. We cache the last `(x, value, grad)` so
/// the energy is evaluated once per unique point.
struct EnergyProblem<'a, 'm, F> {
    energy: &'a F,
    monitor: RefCell<Option<Monitor<'m>>>,
    evaluations: &'a Cell<usize>,
    loss_trace: &'a RefCell<Vec<f64>>,
    /// Cached (x, value, gradient) from the last evaluation.
    last_eval: RefCell<Option<(Vec<f64>, f64, Vec<f64>)>>,
}

impl<F: Functional> EnergyProblem<'_, '_, F> {
    /// Evaluate at `x` unless it is the cached point; returns (value, grad).
    fn evaluate(&self, x: &[f64]) -> Result<(f64, Vec<f64>)> {
        if let Some((ref cx, value, ref grad)) = *self.last_eval.borrow() {
            if cx.as_slice() == x {
                return Ok((value, grad.clone()));
            }
        }
        if x.len() != self.energy.nx() {
            return Err(Error::Shape(format!(
                "{} expects {} variables, got {}",
                self.energy.name(),
                self.energy.nx(),
                x.len()
            )));
        }
        let value = self.energy.val(x);
        let mut grad = vec![0.0; x.len()];
        self.energy.gra(x, &mut grad);
        if !value.is_finite() || !grad.iter().all(|g| g.is_finite()) {
            return Err(Error::Solver(format!(
                "{} or its gradient is not finite at evaluation {}",
                self.energy.name(),
                self.evaluations.get() + 1
            )));
        }

        let count = self.evaluations.get() + 1;
        self.evaluations.set(count);
        self.loss_trace.borrow_mut().push(value);
        if let Some(monitor) = self.monitor.borrow_mut().as_mut() {
            if count % monitor.every == 0 {
                (monitor.hook)(count, x);
            }
        }
        *self.last_eval.borrow_mut() = Some((x.to_vec(), value, grad.clone()));
        Ok((value, grad))
    }
}

impl<F: Functional> CostFunction for EnergyProblem<'_, '_, F> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.evaluate(x)
            .map(|(value, _)| value)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl<F: Functional> Gradient for EnergyProblem<'_, '_, F> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        x: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.evaluate(x)
            .map(|(_, grad)| grad)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────
//  Driver
// ─────────────────────────────────────────────────────────────

impl LbfgsOptions {
    /// `lbfgs.epsf.value` and `lbfgs.maxits.value` are required;
    /// `lbfgs.epsx.value` and `lbfgs.memory.value` default to 0 and 10.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            epsf: config.get("lbfgs.epsf.value")?,
            epsx: config.get_or("lbfgs.epsx.value", 0.0)?,
            maxits: config.get("lbfgs.maxits.value")?,
            memory: config.get_or("lbfgs.memory.value", 10)?,
        })
    }
}

/// Quasi-Newton minimizer with an explicit lifecycle.
///
/// `status()` is `Initialized` until the first call to
/// [`Lbfgs::minimize`], `Iterating` while it runs, and one of the terminal
/// states afterwards.
#[derive(Debug, Clone)]
pub struct Lbfgs {
    options: LbfgsOptions,
    status: OptimizerStatus,
}

impl Lbfgs {
    pub fn new(options: LbfgsOptions) -> Self {
        Self {
            options,
            status: OptimizerStatus::Initialized,
        }
    }

    pub fn options(&self) -> &LbfgsOptions {
        &self.options
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status
    }

    /// Minimize `energy` starting from `x`; the best point found is written
    /// back into `x`.
    ///
    /// Reaching `maxits` is not an error: the report carries
    /// `MaxIterationsReached`. Solver errors set `Failed` and are returned.
    pub fn minimize<F: Functional>(
        &mut self,
        energy: &F,
        x: &mut [f64],
        monitor: Option<Monitor<'_>>,
    ) -> Result<OptimizationReport> {
        if x.len() != energy.nx() {
            self.status = OptimizerStatus::Failed;
            return Err(Error::Shape(format!(
                "{} expects {} variables, got {}",
                energy.name(),
                energy.nx(),
                x.len()
            )));
        }
        self.status = OptimizerStatus::Iterating;

        let mut grad = vec![0.0; x.len()];
        energy.gra(x, &mut grad);
        if norm(&grad) <= self.options.epsf {
            self.status = OptimizerStatus::Converged;
            return Ok(self.report(energy, x, 0, 1, vec![energy.val(x)]));
        }

        let evaluations = Cell::new(0);
        let loss_trace = RefCell::new(Vec::new());
        let problem = EnergyProblem {
            energy,
            monitor: RefCell::new(monitor),
            evaluations: &evaluations,
            loss_trace: &loss_trace,
            last_eval: RefCell::new(None),
        };

        let run = self.run_argmin(problem, x.to_vec());
        let (best, iterations, reason) = match run {
            Ok(out) => out,
            Err(e) => {
                self.status = OptimizerStatus::Failed;
                warn!(
                    energy = energy.name(),
                    evaluations = evaluations.get(),
                    "L-BFGS failed: {e}"
                );
                return Err(e);
            }
        };

        self.status = match reason {
            Some(TerminationReason::SolverConverged)
            | Some(TerminationReason::TargetCostReached) => OptimizerStatus::Converged,
            Some(TerminationReason::MaxItersReached) => OptimizerStatus::MaxIterationsReached,
            other => {
                self.status = OptimizerStatus::Failed;
                warn!(energy = energy.name(), "L-BFGS stopped: {other:?}");
                return Err(Error::Solver(format!(
                    "L-BFGS on {} stopped without converging: {other:?}",
                    energy.name()
                )));
            }
        };
        x.copy_from_slice(&best);

        let report = self.report(
            energy,
            x,
            iterations,
            evaluations.get(),
            loss_trace.into_inner(),
        );
        debug!(
            energy = energy.name(),
            status = ?report.status,
            iterations = report.iterations,
            evaluations = report.evaluations,
            value = report.value,
            gradient_norm = report.gradient_norm,
            "L-BFGS finished"
        );
        Ok(report)
    }

    fn report<F: Functional>(
        &self,
        energy: &F,
        x: &[f64],
        iterations: usize,
        evaluations: usize,
        loss_trace: Vec<f64>,
    ) -> OptimizationReport {
        let mut grad = vec![0.0; x.len()];
        energy.gra(x, &mut grad);
        OptimizationReport {
            status: self.status,
            iterations,
            evaluations,
            value: energy.val(x),
            gradient_norm: norm(&grad),
            loss_trace,
            constraint_max_violation: 0.0,
        }
    }

    fn run_argmin<F: Functional>(
        &self,
        problem: EnergyProblem<'_, '_, F>,
        init_param: Vec<f64>,
    ) -> Result<(Vec<f64>, usize, Option<TerminationReason>)> {
        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.options.memory.max(1))
            .with_tolerance_grad(self.options.epsf)?
            .with_tolerance_cost(self.options.epsx)?;

        let maxits = self.options.maxits as u64;
        let result = Executor::new(problem, solver)
            .configure(|config| {
                config
                    .param(init_param)
                    .max_iters(maxits)
                    .target_cost(f64::NEG_INFINITY)
            })
            .run()?;

        let state = result.state();
        let best = state
            .get_best_param()
            .or_else(|| state.get_param())
            .cloned()
            .ok_or_else(|| Error::Solver("L-BFGS returned no parameters".into()))?;
        Ok((
            best,
            state.get_iter() as usize,
            state.get_termination_reason().cloned(),
        ))
    }

    // ─────────────────────────────────────────────────────────
    //  Equality constraints via augmented Lagrangian
    // ─────────────────────────────────────────────────────────

    /// Minimize `energy` subject to `constraint(x) = 0`.
    ///
    /// Solves a sequence of unconstrained L-BFGS problems over
    ///
    ///   E(x) + Σ_k λ_k c_k(x) + (μ/2) c_k(x)²
    ///
    /// updating `λ_k ← λ_k + μ c_k` and `μ ← min(μ_max, α μ)` after each,
    /// until `max |c_k|` drops below the tolerance or the outer budget runs
    /// out.
    pub fn minimize_constrained<E: Functional, C: Constraint>(
        &mut self,
        energy: &E,
        constraint: &C,
        x: &mut [f64],
        settings: &AugmentedLagrangianOptions,
    ) -> Result<OptimizationReport> {
        let mut lagrangian = AugmentedLagrangian::new(energy, constraint, settings.mu_init)?;
        let mut iterations = 0;
        let mut evaluations = 0;
        let mut loss_trace = Vec::new();
        let mut inner_status = OptimizerStatus::Initialized;
        let mut violation = f64::INFINITY;

        for outer in 0..settings.max_outer_iters.max(1) {
            let inner = self.minimize(&lagrangian, x, None)?;
            iterations += inner.iterations;
            evaluations += inner.evaluations;
            loss_trace.extend(inner.loss_trace);
            inner_status = inner.status;

            let c = lagrangian.constraint_values(x);
            violation = c.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            info!(
                outer = outer + 1,
                mu = lagrangian.mu,
                max_violation = violation,
                "augmented lagrangian step"
            );
            if violation < settings.constraint_tol {
                break;
            }
            lagrangian.update_multipliers(&c);
            lagrangian.mu = (lagrangian.mu * settings.mu_factor).min(settings.mu_max);
        }

        self.status = if violation < settings.constraint_tol {
            inner_status
        } else {
            OptimizerStatus::MaxIterationsReached
        };
        let mut report = self.report(energy, x, iterations, evaluations, loss_trace);
        report.constraint_max_violation = violation;
        Ok(report)
    }
}

/// Logs each term of `energy` and the total gradient norm at `x`.
pub fn log_energies<F: Functional>(stage: &str, energy: &CompositeEnergy<'_, F>, x: &[f64]) {
    for (term, value) in energy.values(x) {
        info!(stage, term, value, "energy");
    }
    let mut grad = vec![0.0; x.len()];
    energy.gra(x, &mut grad);
    info!(stage, gradient_norm = norm(&grad), "gradient");
}
