//! Fit configuration: per-parameter settings, minimizer selection and
//! minimizer options.
//!
//! The configuration is the only piece of engine state the legacy shim
//! mutates directly. It is plain data; all invariants that matter to the
//! minimizer (fixed parameters, limits) are applied when the bounds
//! vector is materialized in [`FitConfig::bounds`].

use serde::{Deserialize, Serialize};

/// Settings for a single fit parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSettings {
    name: String,
    value: f64,
    step_size: f64,
    lower_limit: f64,
    upper_limit: f64,
    has_limits: bool,
    fixed: bool,
}

impl ParameterSettings {
    /// Create an unbounded, free parameter.
    pub fn new(name: impl Into<String>, value: f64, step_size: f64) -> Self {
        Self {
            name: name.into(),
            value,
            step_size,
            lower_limit: 0.0,
            upper_limit: 0.0,
            has_limits: false,
            fixed: false,
        }
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured (initial) value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the configured value.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Initial step size (also reported as the pre-fit error).
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Whether the parameter is held fixed during minimization.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Fix the parameter at its current value.
    pub fn fix(&mut self) {
        self.fixed = true;
    }

    /// Release a previously fixed parameter.
    pub fn release(&mut self) {
        self.fixed = false;
    }

    /// Apply box limits. Limits are applied only when `low < high`,
    /// strictly: equal bounds do not apply limits and leave the current
    /// limit state untouched.
    pub fn set_limits(&mut self, low: f64, high: f64) {
        if low < high {
            self.lower_limit = low;
            self.upper_limit = high;
            self.has_limits = true;
        }
    }

    /// Remove any box limits.
    pub fn remove_limits(&mut self) {
        self.lower_limit = 0.0;
        self.upper_limit = 0.0;
        self.has_limits = false;
    }

    /// Whether box limits are active.
    pub fn has_limits(&self) -> bool {
        self.has_limits
    }

    /// Lower limit (meaningful only when [`has_limits`](Self::has_limits)).
    pub fn lower_limit(&self) -> f64 {
        self.lower_limit
    }

    /// Upper limit (meaningful only when [`has_limits`](Self::has_limits)).
    pub fn upper_limit(&self) -> f64 {
        self.upper_limit
    }
}

/// Minimization algorithm selected for the next fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinimizerAlgo {
    /// Gradient-based bounded quasi-Newton minimization (L-BFGS).
    Migrad,
    /// Migrad with a Nelder-Mead fallback when it fails to converge.
    Minimize,
    /// Nelder-Mead simplex.
    Simplex,
    /// Coarse per-parameter grid scan.
    Scan,
}

impl MinimizerAlgo {
    /// Algorithm name as reported in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Migrad => "Migrad",
            Self::Minimize => "Minimize",
            Self::Simplex => "Simplex",
            Self::Scan => "Scan",
        }
    }
}

impl std::fmt::Display for MinimizerAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options shared by all minimization backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinimizerOptions {
    /// Print verbosity (0 = quiet).
    pub print_level: i32,
    /// Minimization strategy hint (0 = fast, 2 = careful).
    pub strategy: i32,
    /// Error definition UP: 1.0 for chi-square objectives, 0.5 for
    /// negative log-likelihoods. Scales the covariance as `2·UP·H⁻¹`.
    pub error_def: f64,
    /// Maximum number of solver iterations.
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm (simplex: on the
    /// standard deviation of vertex costs).
    pub tolerance: f64,
    /// Compute MINOS-style asymmetric errors after minimization.
    pub minos_errors: bool,
    /// Publish parabolic (Hessian-based) errors.
    pub parab_errors: bool,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            print_level: 0,
            strategy: 1,
            error_def: 1.0,
            max_iter: 1000,
            tolerance: 1e-6,
            minos_errors: false,
            parab_errors: false,
        }
    }
}

/// Full configuration for one fit: parameter list, algorithm, options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitConfig {
    params: Vec<ParameterSettings>,
    minimizer: Option<MinimizerAlgo>,
    /// Minimizer options, mutated in place by SET-style commands.
    pub options: MinimizerOptions,
}

impl FitConfig {
    /// Empty configuration with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of configured parameters.
    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    /// Number of non-fixed parameters.
    pub fn n_free(&self) -> usize {
        self.params.iter().filter(|p| !p.is_fixed()).count()
    }

    /// Settings for parameter `index`.
    pub fn par_settings(&self, index: usize) -> Option<&ParameterSettings> {
        self.params.get(index)
    }

    /// Mutable settings for parameter `index`.
    pub fn par_settings_mut(&mut self, index: usize) -> Option<&mut ParameterSettings> {
        self.params.get_mut(index)
    }

    /// The full parameter list.
    pub fn params(&self) -> &[ParameterSettings] {
        &self.params
    }

    /// Mutable access to the full parameter list (insert/overwrite).
    pub fn params_mut(&mut self) -> &mut Vec<ParameterSettings> {
        &mut self.params
    }

    /// Currently selected minimizer, if any.
    pub fn minimizer(&self) -> Option<MinimizerAlgo> {
        self.minimizer
    }

    /// Select the minimization algorithm for subsequent fits.
    pub fn set_minimizer(&mut self, algo: MinimizerAlgo) {
        self.minimizer = Some(algo);
    }

    /// Initial parameter values in index order.
    pub fn init_values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value()).collect()
    }

    /// Box bounds for the minimizer. Fixed parameters are clamped to
    /// their configured value; unlimited parameters get infinite bounds.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params
            .iter()
            .map(|p| {
                if p.is_fixed() {
                    (p.value(), p.value())
                } else if p.has_limits() {
                    (p.lower_limit(), p.upper_limit())
                } else {
                    (f64::NEG_INFINITY, f64::INFINITY)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_strictly_ordered() {
        let mut p = ParameterSettings::new("p0", 1.0, 0.1);
        p.set_limits(0.0, 2.0);
        assert!(p.has_limits());

        // Equal bounds are not limits; the previous ones survive.
        p.set_limits(-1.0, -1.0);
        assert!(p.has_limits());
        assert_eq!(p.lower_limit(), 0.0);
        assert_eq!(p.upper_limit(), 2.0);

        // Reversed bounds are ignored as well.
        p.set_limits(5.0, 3.0);
        assert_eq!(p.upper_limit(), 2.0);
    }

    #[test]
    fn test_bounds_materialization() {
        let mut cfg = FitConfig::new();
        cfg.params_mut().push(ParameterSettings::new("a", 1.5, 0.1));
        let mut b = ParameterSettings::new("b", 2.0, 0.1);
        b.set_limits(0.0, 4.0);
        cfg.params_mut().push(b);
        let mut c = ParameterSettings::new("c", 3.0, 0.1);
        c.fix();
        cfg.params_mut().push(c);

        let bounds = cfg.bounds();
        assert_eq!(bounds[0], (f64::NEG_INFINITY, f64::INFINITY));
        assert_eq!(bounds[1], (0.0, 4.0));
        assert_eq!(bounds[2], (3.0, 3.0));
        assert_eq!(cfg.n_free(), 2);
    }
}
