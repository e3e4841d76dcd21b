//! Bounded minimization backends.
//!
//! Wraps argmin solvers behind a single [`minimize`] entry point keyed by
//! [`MinimizerAlgo`]. Box bounds are enforced by clamping plus a
//! projected-gradient heuristic; fixed parameters arrive here as bounds
//! clamped to a single point and therefore never move.

use crate::config::{MinimizerAlgo, MinimizerOptions};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;
use mc_core::Result;
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Number of grid points per parameter in a Scan.
const SCAN_POINTS: usize = 41;

/// Number of curvature pairs kept by L-BFGS.
const LBFGS_MEMORY: usize = 10;

/// Objective function trait for minimization.
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate the objective at the given parameter point.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at the given point (numerical if not overridden).
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        // Central differences with adaptive step size.
        let n = params.len();
        let mut grad = vec![0.0; n];

        for i in 0..n {
            let eps = 1e-8 * params[i].abs().max(1.0);

            let mut params_plus = params.to_vec();
            params_plus[i] += eps;
            let f_plus = self.eval(&params_plus)?;

            let mut params_minus = params.to_vec();
            params_minus[i] -= eps;
            let f_minus = self.eval(&params_minus)?;

            grad[i] = (f_plus - f_minus) / (2.0 * eps);
        }

        Ok(grad)
    }
}

/// Result of one minimization run.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters (clamped into bounds).
    pub parameters: Vec<f64>,
    /// Objective value at the minimum.
    pub fval: f64,
    /// Objective value at the starting point.
    pub initial_cost: f64,
    /// Number of solver iterations.
    pub n_iter: u64,
    /// Number of objective evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Convergence status.
    pub converged: bool,
    /// Termination message.
    pub message: String,
    /// Gradient at the best point, when the backend produces one.
    pub final_gradient: Option<Vec<f64>>,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

/// Adapter making an [`ObjectiveFunction`] consumable by argmin solvers.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
    counts: Arc<FuncCounts>,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        self.objective.eval(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp_params(params, self.bounds);
        let mut g = self
            .objective
            .gradient(&clamped)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Projected-gradient heuristic: at an active bound, zero any
        // component that would push further outside, so the line search
        // does not keep stepping into the flat clamped region.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
            if x <= lo + EPS && g[i] > 0.0 {
                g[i] = 0.0;
            }
            if x >= hi - EPS && g[i] < 0.0 {
                g[i] = 0.0;
            }
        }

        Ok(g)
    }
}

/// Minimize `objective` with the selected algorithm.
///
/// `bounds` must have the same length as `init_params`; fixed parameters
/// are expressed as `(value, value)` bounds.
pub fn minimize(
    algo: MinimizerAlgo,
    objective: &dyn ObjectiveFunction,
    init_params: &[f64],
    bounds: &[(f64, f64)],
    options: &MinimizerOptions,
) -> Result<OptimizationResult> {
    if init_params.len() != bounds.len() {
        return Err(mc_core::Error::Validation(format!(
            "Parameter and bounds length mismatch: {} != {}",
            init_params.len(),
            bounds.len()
        )));
    }

    match algo {
        MinimizerAlgo::Migrad => minimize_lbfgs(objective, init_params, bounds, options),
        MinimizerAlgo::Simplex => minimize_nelder_mead(objective, init_params, bounds, options),
        MinimizerAlgo::Scan => minimize_scan(objective, init_params, bounds, options),
        MinimizerAlgo::Minimize => {
            match minimize_lbfgs(objective, init_params, bounds, options) {
                Ok(first) if first.converged => Ok(first),
                Ok(first) => {
                    log::warn!(
                        "Minimize: gradient minimization stalled ({}), falling back to simplex",
                        first.message
                    );
                    let second =
                        minimize_nelder_mead(objective, &first.parameters, bounds, options)?;
                    if second.fval <= first.fval { Ok(second) } else { Ok(first) }
                }
                Err(e) => {
                    log::warn!("Minimize: gradient minimization failed ({e}), falling back to simplex");
                    minimize_nelder_mead(objective, init_params, bounds, options)
                }
            }
        }
    }
}

fn minimize_lbfgs(
    objective: &dyn ObjectiveFunction,
    init_params: &[f64],
    bounds: &[(f64, f64)],
    options: &MinimizerOptions,
) -> Result<OptimizationResult> {
    let init_clamped = clamp_params(init_params, bounds);
    let initial_cost = objective.eval(&init_clamped)?;

    let counts = Arc::new(FuncCounts::default());
    let problem = ArgminProblem { objective, bounds, counts: counts.clone() };

    let linesearch = MoreThuenteLineSearch::new();
    // Argmin's default cost tolerance is ~EPS, too strict for chi-square
    // scales; derive it from the gradient tolerance instead.
    let tol_cost =
        if options.tolerance == 0.0 { 0.0 } else { (0.1 * options.tolerance).max(1e-12) };
    let solver = LBFGS::new(linesearch, LBFGS_MEMORY)
        .with_tolerance_grad(options.tolerance)
        .map_err(|e| {
            mc_core::Error::Validation(format!("Invalid minimizer configuration (tol): {e}"))
        })?;
    let solver = solver.with_tolerance_cost(tol_cost).map_err(|e| {
        mc_core::Error::Validation(format!("Invalid minimizer configuration (tol_cost): {e}"))
    })?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init_clamped).max_iters(options.max_iter))
        .run()
        .map_err(|e| mc_core::Error::Computation(format!("Minimization failed: {e}")))?;

    let state = res.state();
    let best_unclamped = state
        .get_best_param()
        .ok_or_else(|| mc_core::Error::Computation("No best parameters found".to_string()))?
        .clone();
    let best_params = clamp_params(&best_unclamped, bounds);
    let fval = state.get_best_cost();
    let n_iter = state.get_iter();

    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    let message = termination.to_string();

    let final_gradient = objective.gradient(&best_params)?;
    let n_fev = counts.cost.load(Ordering::Relaxed);
    let n_gev = counts.grad.load(Ordering::Relaxed) + 1;

    Ok(OptimizationResult {
        parameters: best_params,
        fval,
        initial_cost,
        n_iter,
        n_fev,
        n_gev,
        converged,
        message,
        final_gradient: Some(final_gradient),
    })
}

fn minimize_nelder_mead(
    objective: &dyn ObjectiveFunction,
    init_params: &[f64],
    bounds: &[(f64, f64)],
    options: &MinimizerOptions,
) -> Result<OptimizationResult> {
    let init_clamped = clamp_params(init_params, bounds);
    let initial_cost = objective.eval(&init_clamped)?;

    // Initial simplex: the start point plus one shifted vertex per free
    // dimension. Fixed dimensions (point bounds) are never displaced, so
    // the simplex cannot explore them.
    let mut simplex: Vec<Vec<f64>> = vec![init_clamped.clone()];
    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        if lo == hi {
            continue;
        }
        let mut vertex = init_clamped.clone();
        let delta = 0.1 * vertex[i].abs().max(1.0);
        vertex[i] = if vertex[i] + delta <= hi { vertex[i] + delta } else { vertex[i] - delta };
        vertex[i] = vertex[i].clamp(lo, hi);
        simplex.push(vertex);
    }
    if simplex.len() < 2 {
        // All parameters fixed: nothing to minimize.
        return Ok(OptimizationResult {
            parameters: init_clamped,
            fval: initial_cost,
            initial_cost,
            n_iter: 0,
            n_fev: 1,
            n_gev: 0,
            converged: true,
            message: "All parameters fixed".to_string(),
            final_gradient: None,
        });
    }

    let counts = Arc::new(FuncCounts::default());
    let problem = ArgminProblem { objective, bounds, counts: counts.clone() };

    let solver = NelderMead::new(simplex).with_sd_tolerance(options.tolerance.max(1e-12)).map_err(
        |e| mc_core::Error::Validation(format!("Invalid simplex configuration: {e}")),
    )?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(options.max_iter))
        .run()
        .map_err(|e| mc_core::Error::Computation(format!("Simplex minimization failed: {e}")))?;

    let state = res.state();
    let best_unclamped = state
        .get_best_param()
        .ok_or_else(|| mc_core::Error::Computation("No best parameters found".to_string()))?
        .clone();
    let best_params = clamp_params(&best_unclamped, bounds);
    let fval = state.get_best_cost();
    let n_iter = state.get_iter();

    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    let message = termination.to_string();

    Ok(OptimizationResult {
        parameters: best_params,
        fval,
        initial_cost,
        n_iter,
        n_fev: counts.cost.load(Ordering::Relaxed),
        n_gev: 0,
        converged,
        message,
        final_gradient: None,
    })
}

/// Coarse grid scan: walk each free parameter in turn over a grid,
/// holding the others at the current best point, and keep the best value
/// seen. Not a convergent minimizer; mirrors the legacy SCAn command.
fn minimize_scan(
    objective: &dyn ObjectiveFunction,
    init_params: &[f64],
    bounds: &[(f64, f64)],
    _options: &MinimizerOptions,
) -> Result<OptimizationResult> {
    let mut current = clamp_params(init_params, bounds);
    let initial_cost = objective.eval(&current)?;
    let mut best_fval = initial_cost;
    let mut n_fev = 1;
    let mut n_scanned = 0u64;

    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        if lo == hi {
            continue;
        }
        n_scanned += 1;

        let (scan_lo, scan_hi) = if lo.is_finite() && hi.is_finite() {
            (lo, hi)
        } else {
            let half_range = 10.0 * current[i].abs().max(1.0);
            ((current[i] - half_range).max(lo), (current[i] + half_range).min(hi))
        };
        let step = (scan_hi - scan_lo) / (SCAN_POINTS - 1) as f64;

        let evals: Vec<(f64, Result<f64>)> = (0..SCAN_POINTS)
            .into_par_iter()
            .map(|k| {
                let x = scan_lo + k as f64 * step;
                let mut point = current.clone();
                point[i] = x;
                (x, objective.eval(&point))
            })
            .collect();

        n_fev += SCAN_POINTS;
        for (x, fv) in evals {
            let fv = fv?;
            if fv < best_fval {
                best_fval = fv;
                current[i] = x;
            }
        }
    }

    Ok(OptimizationResult {
        parameters: current,
        fval: best_fval,
        initial_cost,
        n_iter: n_scanned,
        n_fev,
        n_gev: 0,
        converged: true,
        message: "Scan completed".to_string(),
        final_gradient: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + (y - 3)^2, minimum at (2, 3).
    struct QuadraticFunction;

    impl ObjectiveFunction for QuadraticFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok((x - 2.0).powi(2) + (y - 3.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            let x = params[0];
            let y = params[1];
            Ok(vec![2.0 * (x - 2.0), 2.0 * (y - 3.0)])
        }
    }

    fn options() -> MinimizerOptions {
        MinimizerOptions { max_iter: 500, tolerance: 1e-6, ..Default::default() }
    }

    #[test]
    fn test_migrad_quadratic() {
        let init = vec![0.0, 0.0];
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let result =
            minimize(MinimizerAlgo::Migrad, &QuadraticFunction, &init, &bounds, &options())
                .unwrap();

        assert!(result.converged, "should converge: {}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
        assert!(result.n_fev > 0);
        assert!(result.final_gradient.is_some());
    }

    #[test]
    fn test_migrad_respects_bounds() {
        // Constrained to x in [3, 5], y in [1, 2]: optimum at (3, 2).
        let init = vec![4.0, 1.5];
        let bounds = vec![(3.0, 5.0), (1.0, 2.0)];
        let result =
            minimize(MinimizerAlgo::Migrad, &QuadraticFunction, &init, &bounds, &options())
                .unwrap();

        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
        assert!(result.converged, "should converge at bound, got: {}", result.message);
    }

    #[test]
    fn test_simplex_quadratic() {
        let init = vec![0.0, 0.0];
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let result =
            minimize(MinimizerAlgo::Simplex, &QuadraticFunction, &init, &bounds, &options())
                .unwrap();

        assert!(result.converged, "simplex should converge: {}", result.message);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-3);
    }

    #[test]
    fn test_simplex_all_fixed() {
        let init = vec![1.0, 1.0];
        let bounds = vec![(1.0, 1.0), (1.0, 1.0)];
        let result =
            minimize(MinimizerAlgo::Simplex, &QuadraticFunction, &init, &bounds, &options())
                .unwrap();
        assert!(result.converged);
        assert_eq!(result.parameters, vec![1.0, 1.0]);
        assert_relative_eq!(result.fval, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scan_finds_coarse_minimum() {
        let init = vec![-5.0, -5.0];
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let result =
            minimize(MinimizerAlgo::Scan, &QuadraticFunction, &init, &bounds, &options()).unwrap();

        // 41 points over [-10, 10] gives a 0.5 grid pitch.
        assert!(result.converged);
        assert!((result.parameters[0] - 2.0).abs() <= 0.5);
        assert!((result.parameters[1] - 3.0).abs() <= 0.5);
        assert!(result.fval <= result.initial_cost);
    }

    #[test]
    fn test_scan_skips_fixed_parameters() {
        let init = vec![0.0, 3.0];
        let bounds = vec![(-10.0, 10.0), (3.0, 3.0)];
        let result =
            minimize(MinimizerAlgo::Scan, &QuadraticFunction, &init, &bounds, &options()).unwrap();
        assert_eq!(result.parameters[1], 3.0);
        assert_eq!(result.n_iter, 1);
    }

    // Rosenbrock: f(x,y) = (1-x)^2 + 100(y-x^2)^2, minimum at (1, 1).
    struct RosenbrockFunction;

    impl ObjectiveFunction for RosenbrockFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok((1.0 - x).powi(2) + 100.0 * (y - x.powi(2)).powi(2))
        }
    }

    #[test]
    fn test_migrad_rosenbrock_numerical_gradient() {
        let init = vec![0.0, 0.0];
        let bounds = vec![(-10.0, 10.0), (-10.0, 10.0)];
        let opts = MinimizerOptions { max_iter: 2000, tolerance: 1e-6, ..Default::default() };
        let result =
            minimize(MinimizerAlgo::Migrad, &RosenbrockFunction, &init, &bounds, &opts).unwrap();

        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 1.0, epsilon = 1e-3);
        assert!(result.fval < 1e-4);
    }

    #[test]
    fn test_minimize_falls_back_to_simplex() {
        // |x - 2| has no useful curvature for L-BFGS at the kink; the
        // fallback should still land near the minimum.
        struct AbsFunction;
        impl ObjectiveFunction for AbsFunction {
            fn eval(&self, params: &[f64]) -> Result<f64> {
                Ok((params[0] - 2.0).abs())
            }
        }

        let opts = MinimizerOptions { max_iter: 60, tolerance: 1e-10, ..Default::default() };
        let result =
            minimize(MinimizerAlgo::Minimize, &AbsFunction, &[0.0], &[(-10.0, 10.0)], &opts)
                .unwrap();
        assert!((result.parameters[0] - 2.0).abs() < 0.1);
    }

    #[test]
    fn test_length_mismatch_is_validation_error() {
        let err =
            minimize(MinimizerAlgo::Migrad, &QuadraticFunction, &[0.0], &[], &options());
        assert!(err.is_err());
    }
}
