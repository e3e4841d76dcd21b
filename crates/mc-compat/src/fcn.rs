//! Adapter for the legacy objective-callback signature.
//!
//! Legacy clients supply an FCN of the form
//! `(npar, grad_out, fval_out, params, flag)`. The adapter owns the
//! callback directly (no process-wide current-fitter state) and exposes
//! it as an [`ObjectiveFunction`] the engine can minimize. Its dimension
//! is synchronized with the parameter store before every delegated call.

use mc_core::Result;
use mc_engine::ObjectiveFunction;
use std::fmt;

/// Flag value passed to the callback for a plain evaluation.
pub const FCN_FLAG_EVAL: i32 = 4;

/// The legacy 5-argument objective callback:
/// `(npar, grad_out, fval_out, params, flag)`.
///
/// `grad_out` is empty unless the caller requests a gradient; `flag`
/// follows the Minuit convention (4 = evaluate).
pub type LegacyFcnCallback =
    Box<dyn Fn(usize, &mut [f64], &mut f64, &[f64], i32) + Send + Sync>;

/// Wraps a [`LegacyFcnCallback`] as an engine objective.
pub struct LegacyFcnAdapter {
    callback: LegacyFcnCallback,
    dimension: usize,
}

impl fmt::Debug for LegacyFcnAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyFcnAdapter").field("dimension", &self.dimension).finish()
    }
}

impl LegacyFcnAdapter {
    /// Wrap a legacy callback. The dimension starts at 0 and must be
    /// synchronized with the parameter store before fitting.
    pub fn new(callback: LegacyFcnCallback) -> Self {
        Self { callback, dimension: 0 }
    }

    /// Current parameter dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Keep the dimension in sync with the parameter store.
    pub fn set_dimension(&mut self, dimension: usize) {
        self.dimension = dimension;
    }

    /// Invoke the callback once with an explicit flag (CALL FCN path).
    pub fn call(&self, params: &[f64], flag: i32) -> f64 {
        let mut fval = 0.0;
        let mut grad: [f64; 0] = [];
        (self.callback)(params.len(), &mut grad, &mut fval, params, flag);
        fval
    }
}

impl ObjectiveFunction for LegacyFcnAdapter {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        if params.len() != self.dimension {
            return Err(mc_core::Error::Validation(format!(
                "objective dimension mismatch: got {} parameters, adapter configured for {}",
                params.len(),
                self.dimension
            )));
        }
        Ok(self.call(params, FCN_FLAG_EVAL))
    }
}
