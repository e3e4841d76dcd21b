//! The fitting entry point.
//!
//! [`Fitter`] owns the [`FitConfig`] mutated by callers and the current
//! [`FitResult`]. A call to [`Fitter::fit_fcn`] runs the configured
//! minimizer, derives errors and covariance from the Hessian at the
//! minimum, optionally walks the profile for MINOS-style asymmetric
//! errors, and replaces the result wholesale. On any hard failure the
//! previous result is left untouched.

use crate::config::{FitConfig, MinimizerAlgo, MinimizerOptions};
use crate::optimizer::{self, ObjectiveFunction};
use crate::result::FitResult;
use mc_core::Result;
use nalgebra::DMatrix;

const MINOS_MAX_EXPAND: usize = 20;
const MINOS_MAX_BISECT: usize = 40;

/// Delegated fitting engine: configuration in, immutable result out.
#[derive(Debug, Default)]
pub struct Fitter {
    config: FitConfig,
    result: FitResult,
}

impl Fitter {
    /// Fitter with an empty configuration and no result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current fit configuration.
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Mutable fit configuration.
    pub fn config_mut(&mut self) -> &mut FitConfig {
        &mut self.config
    }

    /// Current fit result (empty before the first fit).
    pub fn result(&self) -> &FitResult {
        &self.result
    }

    /// Minimize `objective` with the configured algorithm and replace
    /// the stored result.
    ///
    /// Returns `Ok(true)` when the minimizer converged, `Ok(false)` when
    /// it terminated without convergence (the result is still stored,
    /// flagged invalid). Hard failures (objective errors, bad
    /// configuration) leave the previous result in place.
    pub fn fit_fcn(&mut self, objective: &dyn ObjectiveFunction) -> Result<bool> {
        let n = self.config.n_params();
        if n == 0 {
            return Err(mc_core::Error::Validation(
                "cannot fit: no parameters configured".to_string(),
            ));
        }

        let algo = self.config.minimizer().unwrap_or(MinimizerAlgo::Migrad);
        let options = self.config.options.clone();
        let init = self.config.init_values();
        let bounds = self.config.bounds();

        let opt = optimizer::minimize(algo, objective, &init, &bounds, &options)?;

        // Free/fixed split is captured at fit time; later FIX commands
        // do not retroactively change this result.
        let mut free_slot: Vec<Option<usize>> = Vec::with_capacity(n);
        let mut free_indices: Vec<usize> = Vec::new();
        for (i, p) in self.config.params().iter().enumerate() {
            if p.is_fixed() {
                free_slot.push(None);
            } else {
                free_slot.push(Some(free_indices.len()));
                free_indices.push(i);
            }
        }
        let n_free = free_indices.len();

        let hessian = if n_free > 0 {
            Some(compute_hessian_free(objective, &opt.parameters, &free_indices)?)
        } else {
            None
        };
        let hinv = hessian.as_ref().and_then(|h| invert_hessian(h, n_free));

        // Minuit UP convention: covariance = 2·errdef·H⁻¹ (errdef = 1
        // for chi-square, 0.5 for negative log-likelihood).
        let scale = 2.0 * options.error_def;
        let covariance: Option<Vec<f64>> =
            hinv.as_ref().map(|c| c.iter().map(|v| v * scale).collect());

        if hinv.is_none() && hessian.is_some() {
            log::warn!("Hessian inversion failed, using diagonal approximation");
        }
        let mut errors = vec![0.0; n];
        for (s, &t) in free_indices.iter().enumerate() {
            errors[t] = match &hinv {
                Some(c) => {
                    let var = scale * c[(s, s)];
                    if var.is_finite() && var > 0.0 {
                        var.sqrt()
                    } else {
                        diagonal_error(hessian.as_ref(), s, scale)
                    }
                }
                None => diagonal_error(hessian.as_ref(), s, scale),
            };
        }

        // Global correlation: rho_k = sqrt(1 - 1/(C_kk * (C^-1)_kk)).
        // The error-definition scale cancels between C and C^-1.
        let mut global_cc = vec![0.0; n];
        if let (Some(c), Some(h)) = (&hinv, &hessian) {
            for (s, &t) in free_indices.iter().enumerate() {
                let u = c[(s, s)] * h[(s, s)];
                global_cc[t] = if u >= 1.0 { (1.0 - 1.0 / u).sqrt() } else { 0.0 };
            }
        }

        let edm = match (&opt.final_gradient, &hinv) {
            (Some(g), Some(c)) => {
                let mut e = 0.0;
                for (a, &ta) in free_indices.iter().enumerate() {
                    for (b, &tb) in free_indices.iter().enumerate() {
                        e += g[ta] * c[(a, b)] * g[tb];
                    }
                }
                0.5 * e.max(0.0)
            }
            _ => 0.0,
        };

        let (lower_errors, upper_errors) = if options.minos_errors && covariance.is_some() {
            let (lo, up) = self.minos_errors(
                objective,
                &bounds,
                &opt.parameters,
                opt.fval,
                &free_indices,
                &errors,
                &options,
            )?;
            (Some(lo), Some(up))
        } else {
            (None, None)
        };

        self.result = FitResult {
            valid: opt.converged,
            version: self.result.version + 1,
            parameters: opt.parameters,
            errors,
            lower_errors,
            upper_errors,
            global_cc,
            covariance,
            free_slot,
            min_fcn_value: opt.fval,
            edm,
            error_def: options.error_def,
            n_fev: opt.n_fev,
            n_gev: opt.n_gev,
            message: opt.message,
        };

        Ok(self.result.valid)
    }

    /// MINOS-style asymmetric errors: for each free parameter, walk the
    /// profile objective (parameter clamped, others re-minimized,
    /// warm-started from the minimum) to the `errdef` crossing on both
    /// sides. Falls back to the symmetric error with a warning when the
    /// crossing cannot be bracketed.
    #[allow(clippy::too_many_arguments)]
    fn minos_errors(
        &self,
        objective: &dyn ObjectiveFunction,
        bounds: &[(f64, f64)],
        best: &[f64],
        fmin: f64,
        free_indices: &[usize],
        errors: &[f64],
        options: &MinimizerOptions,
    ) -> Result<(Vec<f64>, Vec<f64>)> {
        let n = best.len();
        let mut lower = vec![0.0; n];
        let mut upper = vec![0.0; n];

        for &t in free_indices {
            let sigma = errors[t].max(1e-8);
            upper[t] = self.minos_one_side(objective, bounds, best, fmin, t, sigma, 1.0, options)?;
            lower[t] =
                self.minos_one_side(objective, bounds, best, fmin, t, sigma, -1.0, options)?;
        }
        Ok((lower, upper))
    }

    /// Signed distance from the minimum to the errdef crossing in one
    /// direction (negative for the lower side).
    #[allow(clippy::too_many_arguments)]
    fn minos_one_side(
        &self,
        objective: &dyn ObjectiveFunction,
        bounds: &[(f64, f64)],
        best: &[f64],
        fmin: f64,
        t: usize,
        sigma: f64,
        dir: f64,
        options: &MinimizerOptions,
    ) -> Result<f64> {
        let target = fmin + options.error_def;
        let limit = if dir > 0.0 { bounds[t].1 } else { bounds[t].0 };

        let mut step = sigma;
        let mut t_inside = best[t];
        let mut bracketed = None;

        for _ in 0..MINOS_MAX_EXPAND {
            let mut t_try = best[t] + dir * step;
            if dir > 0.0 {
                t_try = t_try.min(limit);
            } else {
                t_try = t_try.max(limit);
            }
            let f_try = profile_value(objective, bounds, best, t, t_try, options)?;
            if f_try >= target {
                bracketed = Some(t_try);
                break;
            }
            if t_try == limit {
                // Crossing lies outside the allowed range.
                return Ok(limit - best[t]);
            }
            t_inside = t_try;
            step *= 2.0;
        }

        let Some(mut t_outside) = bracketed else {
            log::warn!("MINOS: no errdef crossing bracketed for parameter {t}, using symmetric error");
            return Ok(dir * sigma);
        };

        let tol = 1e-3 * sigma;
        for _ in 0..MINOS_MAX_BISECT {
            if (t_outside - t_inside).abs() <= tol {
                break;
            }
            let mid = 0.5 * (t_inside + t_outside);
            let f_mid = profile_value(objective, bounds, best, t, mid, options)?;
            if f_mid >= target {
                t_outside = mid;
            } else {
                t_inside = mid;
            }
        }

        Ok(0.5 * (t_inside + t_outside) - best[t])
    }
}

/// Profile objective: parameter `t` clamped at `t_value`, the remaining
/// free parameters re-minimized from a warm start.
fn profile_value(
    objective: &dyn ObjectiveFunction,
    bounds: &[(f64, f64)],
    best: &[f64],
    t: usize,
    t_value: f64,
    options: &MinimizerOptions,
) -> Result<f64> {
    let mut clamped_bounds = bounds.to_vec();
    clamped_bounds[t] = (t_value, t_value);
    let mut warm = best.to_vec();
    warm[t] = t_value;

    let others_free = clamped_bounds.iter().any(|&(lo, hi)| lo != hi);
    if !others_free {
        return objective.eval(&warm);
    }

    let mut profile_options = options.clone();
    profile_options.minos_errors = false;
    let opt = optimizer::minimize(
        MinimizerAlgo::Migrad,
        objective,
        &warm,
        &clamped_bounds,
        &profile_options,
    )?;
    Ok(opt.fval)
}

/// Hessian over the free parameters by forward differences of the
/// gradient, symmetrized.
fn compute_hessian_free(
    objective: &dyn ObjectiveFunction,
    best_params: &[f64],
    free_indices: &[usize],
) -> Result<DMatrix<f64>> {
    let n_free = free_indices.len();
    let grad_center = objective.gradient(best_params)?;

    let mut hessian = DMatrix::zeros(n_free, n_free);

    for (b, &tb) in free_indices.iter().enumerate() {
        let eps = 1e-4 * best_params[tb].abs().max(1.0);

        let mut params_plus = best_params.to_vec();
        params_plus[tb] += eps;
        let grad_plus = objective.gradient(&params_plus)?;

        for (a, &ta) in free_indices.iter().enumerate() {
            hessian[(a, b)] = (grad_plus[ta] - grad_center[ta]) / eps;
        }
    }

    // Symmetrise: H = (H + H^T) / 2
    let ht = hessian.transpose();
    hessian = (&hessian + &ht) * 0.5;

    Ok(hessian)
}

/// Invert the Hessian via damped Cholesky, falling back to LU.
///
/// Returns `None` when no positive-variance inverse can be produced.
fn invert_hessian(hessian: &DMatrix<f64>, n: usize) -> Option<DMatrix<f64>> {
    // Even at a valid minimum the numerically estimated Hessian can be
    // slightly indefinite; a damped Cholesky solve avoids negative
    // variances.
    let identity = DMatrix::identity(n, n);

    let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

    let mut h_damped = hessian.clone();
    let mut damping = 0.0_f64;
    let max_attempts = 10;

    for attempt in 0..max_attempts {
        if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
            return Some(chol.solve(&identity));
        }

        if attempt + 1 == max_attempts {
            break;
        }

        let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
        let add = next_damping - damping;
        for i in 0..n {
            h_damped[(i, i)] += add;
        }
        damping = next_damping;
    }

    let cov = h_damped.lu().try_inverse()?;
    for i in 0..n {
        let v = cov[(i, i)];
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
    }
    Some(cov)
}

fn diagonal_error(hessian: Option<&DMatrix<f64>>, s: usize, scale: f64) -> f64 {
    match hessian {
        Some(h) => {
            let denom = h[(s, s)].abs().max(1e-12);
            (scale / denom).sqrt()
        }
        None => 0.0,
    }
}
