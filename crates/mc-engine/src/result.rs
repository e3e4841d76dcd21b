//! Immutable fit result.
//!
//! A [`FitResult`] is produced by [`crate::Fitter::fit_fcn`] and replaced
//! wholesale on every fit; consumers only ever read it. The covariance
//! matrix covers free parameters only; accessors taking a *total*
//! parameter index map to the free slot internally and return 0 for
//! fixed parameters.

use mc_core::{ModelFunction, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;

const PROB_EPS: f64 = 1e-12;

#[inline]
fn standard_normal() -> Normal {
    // Safe by construction for mean=0, sigma=1.
    Normal::new(0.0, 1.0).expect("standard normal should be constructible")
}

/// Result of one fit: best-fit values, errors, covariance and fit
/// quality. Versioned so that derived caches can detect staleness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub(crate) valid: bool,
    pub(crate) version: u64,
    pub(crate) parameters: Vec<f64>,
    pub(crate) errors: Vec<f64>,
    pub(crate) lower_errors: Option<Vec<f64>>,
    pub(crate) upper_errors: Option<Vec<f64>>,
    pub(crate) global_cc: Vec<f64>,
    /// Row-major free×free covariance, scaled by the error definition.
    pub(crate) covariance: Option<Vec<f64>>,
    /// Free slot for each total parameter index (`None` = fixed at fit time).
    pub(crate) free_slot: Vec<Option<usize>>,
    pub(crate) min_fcn_value: f64,
    pub(crate) edm: f64,
    pub(crate) error_def: f64,
    pub(crate) n_fev: usize,
    pub(crate) n_gev: usize,
    pub(crate) message: String,
}

impl Default for FitResult {
    fn default() -> Self {
        Self::empty()
    }
}

impl FitResult {
    /// The empty pre-fit result (version 0, invalid).
    pub fn empty() -> Self {
        Self {
            valid: false,
            version: 0,
            parameters: Vec::new(),
            errors: Vec::new(),
            lower_errors: None,
            upper_errors: None,
            global_cc: Vec::new(),
            covariance: None,
            free_slot: Vec::new(),
            min_fcn_value: 0.0,
            edm: 0.0,
            error_def: 1.0,
            n_fev: 0,
            n_gev: 0,
            message: String::new(),
        }
    }

    /// Whether the fit converged and the result is usable.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether no fit has produced this result yet.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Monotonic fit counter; strictly increases with every completed
    /// fit. Derived caches store the version they were computed against.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Total number of parameters (fixed included).
    pub fn n_total_parameters(&self) -> usize {
        self.parameters.len()
    }

    /// Number of free parameters at fit time.
    pub fn n_free_parameters(&self) -> usize {
        self.free_slot.iter().flatten().count()
    }

    /// Whether parameter `index` was fixed at fit time.
    pub fn is_parameter_fixed(&self, index: usize) -> bool {
        matches!(self.free_slot.get(index), Some(None))
    }

    /// Fitted parameter values in total index order.
    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Fitted value of parameter `index`.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.parameters.get(index).copied()
    }

    /// Symmetric (parabolic) error of parameter `index`; 0 for fixed.
    pub fn error(&self, index: usize) -> Option<f64> {
        self.errors.get(index).copied()
    }

    /// Upper asymmetric error. Falls back to the symmetric error when no
    /// MINOS analysis ran.
    pub fn upper_error(&self, index: usize) -> Option<f64> {
        match &self.upper_errors {
            Some(v) => v.get(index).copied(),
            None => self.error(index),
        }
    }

    /// Lower asymmetric error, reported as a negative number. Falls back
    /// to the negated symmetric error when no MINOS analysis ran.
    pub fn lower_error(&self, index: usize) -> Option<f64> {
        match &self.lower_errors {
            Some(v) => v.get(index).copied(),
            None => self.error(index).map(|e| -e),
        }
    }

    /// Global correlation coefficient of parameter `index`; 0 for fixed.
    pub fn global_cc(&self, index: usize) -> Option<f64> {
        self.global_cc.get(index).copied()
    }

    /// Objective value at the minimum.
    pub fn min_fcn_value(&self) -> f64 {
        self.min_fcn_value
    }

    /// Estimated distance to minimum.
    pub fn edm(&self) -> f64 {
        self.edm
    }

    /// Error definition (UP) the errors were scaled with.
    pub fn error_def(&self) -> f64 {
        self.error_def
    }

    /// Number of objective evaluations spent on the fit.
    pub fn n_fev(&self) -> usize {
        self.n_fev
    }

    /// Number of gradient evaluations spent on the fit.
    pub fn n_gev(&self) -> usize {
        self.n_gev
    }

    /// Termination message from the minimizer.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Covariance element for *total* parameter indices `i`, `j`.
    ///
    /// Returns 0 when either parameter was fixed at fit time, and `None`
    /// when the indices are out of range or no covariance is available.
    pub fn cov_matrix(&self, i: usize, j: usize) -> Option<f64> {
        if i >= self.parameters.len() || j >= self.parameters.len() {
            return None;
        }
        let cov = self.covariance.as_ref()?;
        match (self.free_slot[i], self.free_slot[j]) {
            (Some(a), Some(b)) => {
                let n_free = self.n_free_parameters();
                Some(cov[a * n_free + b])
            }
            _ => Some(0.0),
        }
    }

    /// Correlation coefficient for total indices `i`, `j`.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.cov_matrix(i, j)?;
        let sigma_i = self.error(i)?;
        let sigma_j = self.error(j)?;
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov / (sigma_i * sigma_j))
    }

    /// Confidence-interval half-width of the fitted model at `x`.
    ///
    /// Linear error propagation through the parameter covariance:
    /// `z · sqrt(gᵀ C g)` with `g` the model gradient w.r.t. the free
    /// parameters and `z` the standard normal quantile at `0.5 + cl/2`.
    /// Approximate for models nonlinear in their parameters.
    pub fn confidence_half_width(
        &self,
        model: &dyn ModelFunction,
        x: &[f64],
        cl: f64,
    ) -> Result<f64> {
        if !self.valid {
            return Err(mc_core::Error::Computation(
                "confidence intervals require a valid fit result".to_string(),
            ));
        }
        let cov = self.covariance.as_ref().ok_or_else(|| {
            mc_core::Error::Computation("no covariance matrix available".to_string())
        })?;

        let n_free = self.n_free_parameters();
        let mut grad = vec![0.0; n_free];
        let mut params = self.parameters.clone();
        for (t, slot) in self.free_slot.iter().enumerate() {
            let Some(s) = slot else { continue };
            let eps = 1e-6 * params[t].abs().max(1.0);
            let p0 = params[t];
            params[t] = p0 + eps;
            let f_plus = model.eval(x, &params);
            params[t] = p0 - eps;
            let f_minus = model.eval(x, &params);
            params[t] = p0;
            grad[*s] = (f_plus - f_minus) / (2.0 * eps);
        }

        let mut quad = 0.0;
        for a in 0..n_free {
            for b in 0..n_free {
                quad += grad[a] * cov[a * n_free + b] * grad[b];
            }
        }

        let cl = cl.clamp(0.0, 1.0 - PROB_EPS);
        let z = standard_normal().inverse_cdf(0.5 + cl / 2.0);
        Ok(z * quad.max(0.0).sqrt())
    }

    /// [`confidence_half_width`](Self::confidence_half_width) over a point set.
    pub fn confidence_half_widths(
        &self,
        model: &dyn ModelFunction,
        points: &[Vec<f64>],
        cl: f64,
    ) -> Result<Vec<f64>> {
        points.iter().map(|x| self.confidence_half_width(model, x, cl)).collect()
    }

    /// Multi-line covariance matrix rendering (free parameters only).
    pub fn covariance_summary(&self) -> String {
        let Some(cov) = self.covariance.as_ref() else {
            return "covariance: unavailable".to_string();
        };
        let n_free = self.n_free_parameters();
        let mut out = String::from("covariance (free parameters):\n");
        for a in 0..n_free {
            for b in 0..n_free {
                out.push_str(&format!(" {:>12.5e}", cov[a * n_free + b]));
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FitResult: valid={}, minimum={:.6}, edm={:.3e}, npar={} (free={})",
            self.valid,
            self.min_fcn_value,
            self.edm,
            self.n_total_parameters(),
            self.n_free_parameters()
        )?;
        for (i, &v) in self.parameters.iter().enumerate() {
            let fixed = if self.is_parameter_fixed(i) { "  (fixed)" } else { "" }.to_string();
            writeln!(f, "  #{i}: {v:.6} +/- {:.6}{fixed}", self.errors[i])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_param_result() -> FitResult {
        FitResult {
            valid: true,
            version: 1,
            parameters: vec![1.0, 2.0, 3.0],
            errors: vec![0.1, 0.0, 0.3],
            lower_errors: None,
            upper_errors: None,
            global_cc: vec![0.2, 0.0, 0.4],
            // free params are #0 and #2
            covariance: Some(vec![0.01, 0.002, 0.002, 0.09]),
            free_slot: vec![Some(0), None, Some(1)],
            min_fcn_value: 12.5,
            edm: 1e-7,
            error_def: 1.0,
            n_fev: 40,
            n_gev: 12,
            message: "converged".to_string(),
        }
    }

    #[test]
    fn test_total_index_covariance_access() {
        let r = two_param_result();
        assert_eq!(r.n_free_parameters(), 2);
        assert_eq!(r.cov_matrix(0, 0), Some(0.01));
        assert_eq!(r.cov_matrix(2, 2), Some(0.09));
        assert_eq!(r.cov_matrix(0, 2), Some(0.002));
        // Fixed parameter rows/columns read as zero.
        assert_eq!(r.cov_matrix(1, 0), Some(0.0));
        assert_eq!(r.cov_matrix(5, 0), None);
    }

    #[test]
    fn test_asymmetric_error_fallback() {
        let r = two_param_result();
        assert_eq!(r.upper_error(0), Some(0.1));
        assert_eq!(r.lower_error(0), Some(-0.1));
    }

    #[test]
    fn test_zero_confidence_level_zero_width() {
        let r = two_param_result();
        let line = (1usize, 3usize, |x: &[f64], p: &[f64]| p[0] + p[2] * x[0]);
        let w = r.confidence_half_width(&line, &[1.0], 0.0).unwrap();
        assert_eq!(w, 0.0);
    }

    #[test]
    fn test_half_width_matches_hand_propagation() {
        let r = two_param_result();
        // f = p0 + p2 * x, gradient (1, x) over free params (p0, p2).
        let line = (1usize, 3usize, |x: &[f64], p: &[f64]| p[0] + p[2] * x[0]);
        let x = 2.0;
        let var = 0.01 + 2.0 * 0.002 * x + 0.09 * x * x;
        let z = standard_normal().inverse_cdf(0.5 + 0.95 / 2.0);
        let w = r.confidence_half_width(&line, &[x], 0.95).unwrap();
        approx::assert_relative_eq!(w, z * var.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_result_rejects_intervals() {
        let mut r = two_param_result();
        r.valid = false;
        let line = (1usize, 3usize, |x: &[f64], p: &[f64]| p[0] + p[2] * x[0]);
        assert!(r.confidence_half_width(&line, &[1.0], 0.95).is_err());
    }

    #[test]
    fn test_empty_result() {
        let r = FitResult::empty();
        assert!(r.is_empty());
        assert!(!r.is_valid());
        assert_eq!(r.version(), 0);
        assert_eq!(r.value(0), None);
    }
}
